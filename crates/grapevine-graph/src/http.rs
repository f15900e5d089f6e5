// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cypher-over-HTTP gateway to the property graph.
//!
//! Talks to the Neo4j transaction endpoint
//! (`POST {base}/db/{database}/tx/commit`) with parameterized statements.
//! The graph is an optional signal: callers in the retrieval path degrade
//! errors from here to empty results.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use async_trait::async_trait;
use grapevine_core::GrapevineError;
use grapevine_core::traits::GraphStore;
use grapevine_core::types::{GraphExpansion, GraphNeighbor, GraphPost, PostGraphContext, TagCount};

fn graph_err(e: impl std::fmt::Display) -> GrapevineError {
    GrapevineError::Graph {
        message: e.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct Statement {
    statement: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data: Vec<RowEnvelope>,
}

#[derive(Debug, Deserialize)]
struct RowEnvelope {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Graph gateway over the HTTP transaction API.
#[derive(Debug, Clone)]
pub struct Neo4jHttp {
    client: reqwest::Client,
    endpoint: String,
    user: Option<String>,
    password: Option<String>,
}

impl Neo4jHttp {
    /// Build a gateway for `{base_url}/db/{database}/tx/commit`.
    pub fn new(
        base_url: &str,
        database: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, GrapevineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(graph_err)?;
        Ok(Self {
            client,
            endpoint: format!("{}/db/{database}/tx/commit", base_url.trim_end_matches('/')),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
        })
    }

    async fn run(&self, statements: Vec<Statement>) -> Result<Vec<StatementResult>, GrapevineError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "statements": statements }));
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request.send().await.map_err(graph_err)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(graph_err(format!("graph endpoint returned {status}: {body}")));
        }

        let body: TxResponse = response.json().await.map_err(graph_err)?;
        if let Some(err) = body.errors.first() {
            return Err(graph_err(format!("{}: {}", err.code, err.message)));
        }
        debug!(statements = body.results.len(), "graph transaction committed");
        Ok(body.results)
    }
}

#[async_trait]
impl GraphStore for Neo4jHttp {
    async fn upsert_post(&self, post: &GraphPost) -> Result<(), GrapevineError> {
        let params = json!({
            "telegram_id": post.telegram_id,
            "channel_id": post.channel_id,
            "channel_username": post.channel_username,
            "post_id": post.post_id,
            "posted_at": post.posted_at.to_rfc3339(),
            "posted_epoch": post.posted_at.timestamp(),
            "tags": post.tags,
        });
        let mirror = Statement {
            statement: "MERGE (u:User {telegram_id: $telegram_id}) \
                 MERGE (c:Channel {channel_id: $channel_id}) \
                 SET c.username = $channel_username \
                 MERGE (u)-[:SUBSCRIBES]->(c) \
                 MERGE (p:Post {post_id: $post_id}) \
                 SET p.telegram_id = $telegram_id, p.posted_at = $posted_at, \
                     p.posted_epoch = $posted_epoch \
                 MERGE (p)-[:POSTED_IN]->(c) \
                 WITH p UNWIND $tags AS tag \
                 MERGE (t:Tag {name: tag}) \
                 MERGE (p)-[:TAGGED]->(t)"
                .to_string(),
            parameters: params.clone(),
        };
        // RELATED_TO is derived: ≥ 2 shared tags, or posted within 24 hours
        // in the same channel.
        let relate = Statement {
            statement: "MATCH (p:Post {post_id: $post_id}) \
                 OPTIONAL MATCH (p)-[:TAGGED]->(t:Tag)<-[:TAGGED]-(other:Post) \
                 WITH p, other, count(t) AS shared \
                 WHERE other IS NOT NULL AND (shared >= 2 \
                     OR abs(p.posted_epoch - other.posted_epoch) < 86400) \
                 MERGE (p)-[r:RELATED_TO]->(other) \
                 SET r.shared_tags = shared"
                .to_string(),
            parameters: params,
        };
        self.run(vec![mirror, relate]).await?;
        Ok(())
    }

    async fn user_interests(
        &self,
        telegram_id: i64,
        limit: usize,
    ) -> Result<Vec<TagCount>, GrapevineError> {
        let results = self
            .run(vec![Statement {
                statement: "MATCH (p:Post {telegram_id: $telegram_id})-[:TAGGED]->(t:Tag) \
                     RETURN t.name AS tag, count(p) AS posts_count \
                     ORDER BY posts_count DESC, tag LIMIT $limit"
                    .to_string(),
                parameters: json!({ "telegram_id": telegram_id, "limit": limit }),
            }])
            .await?;
        Ok(rows_to_tag_counts(results))
    }

    async fn trending_tags(
        &self,
        days: u32,
        limit: usize,
    ) -> Result<Vec<TagCount>, GrapevineError> {
        let since = chrono::Utc::now().timestamp() - i64::from(days) * 86400;
        let results = self
            .run(vec![Statement {
                statement: "MATCH (p:Post)-[:TAGGED]->(t:Tag) \
                     WHERE p.posted_epoch >= $since \
                     RETURN t.name AS tag, count(p) AS posts_count \
                     ORDER BY posts_count DESC, tag LIMIT $limit"
                    .to_string(),
                parameters: json!({ "since": since, "limit": limit }),
            }])
            .await?;
        Ok(rows_to_tag_counts(results))
    }

    async fn expand_posts(
        &self,
        post_ids: &[i64],
        limit_per_post: usize,
    ) -> Result<Vec<GraphExpansion>, GrapevineError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let results = self
            .run(vec![Statement {
                statement: "UNWIND $post_ids AS pid \
                     MATCH (p:Post {post_id: pid})-[r:RELATED_TO]-(other:Post) \
                     WITH pid, other, max(r.shared_tags) AS shared \
                     ORDER BY shared DESC, other.post_id \
                     RETURN pid, collect({post_id: other.post_id, shared_tags: shared})[0..$limit] \
                         AS related"
                    .to_string(),
                parameters: json!({ "post_ids": post_ids, "limit": limit_per_post }),
            }])
            .await?;

        let mut expansions = Vec::new();
        for envelope in results.into_iter().flat_map(|r| r.data) {
            let mut row = envelope.row.into_iter();
            let Some(source) = row.next().and_then(|v| v.as_i64()) else {
                continue;
            };
            let related = row
                .next()
                .and_then(|v| serde_json::from_value::<Vec<GraphNeighbor>>(v).ok())
                .unwrap_or_default();
            expansions.push(GraphExpansion {
                source_post_id: source,
                related,
            });
        }
        Ok(expansions)
    }

    async fn post_context(
        &self,
        post_id: i64,
    ) -> Result<Option<PostGraphContext>, GrapevineError> {
        let results = self
            .run(vec![Statement {
                statement: "MATCH (p:Post {post_id: $post_id})-[:POSTED_IN]->(c:Channel) \
                     OPTIONAL MATCH (p)-[:TAGGED]->(t:Tag) \
                     OPTIONAL MATCH (p)-[:RELATED_TO]-(o:Post) \
                     RETURN p.post_id, c.username, collect(DISTINCT t.name), \
                         count(DISTINCT o)"
                    .to_string(),
                parameters: json!({ "post_id": post_id }),
            }])
            .await?;

        let row = results
            .into_iter()
            .flat_map(|r| r.data)
            .next()
            .map(|envelope| envelope.row);
        let Some(row) = row else { return Ok(None) };
        let mut row = row.into_iter();
        let post_id = row.next().and_then(|v| v.as_i64()).unwrap_or_default();
        let channel_username = row
            .next()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let tags = row
            .next()
            .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
            .unwrap_or_default();
        let related_count = row.next().and_then(|v| v.as_i64()).unwrap_or_default();
        Ok(Some(PostGraphContext {
            post_id,
            channel_username,
            tags,
            related_count,
        }))
    }

    async fn delete_posts(&self, post_ids: &[i64]) -> Result<(), GrapevineError> {
        if post_ids.is_empty() {
            return Ok(());
        }
        self.run(vec![Statement {
            statement: "UNWIND $post_ids AS pid \
                 MATCH (p:Post {post_id: pid}) DETACH DELETE p"
                .to_string(),
            parameters: json!({ "post_ids": post_ids }),
        }])
        .await?;
        Ok(())
    }

    async fn delete_user(&self, telegram_id: i64) -> Result<(), GrapevineError> {
        self.run(vec![
            Statement {
                statement: "MATCH (p:Post {telegram_id: $telegram_id}) DETACH DELETE p"
                    .to_string(),
                parameters: json!({ "telegram_id": telegram_id }),
            },
            Statement {
                statement: "MATCH (u:User {telegram_id: $telegram_id}) DETACH DELETE u"
                    .to_string(),
                parameters: json!({ "telegram_id": telegram_id }),
            },
        ])
        .await?;
        Ok(())
    }
}

fn rows_to_tag_counts(results: Vec<StatementResult>) -> Vec<TagCount> {
    results
        .into_iter()
        .flat_map(|r| r.data)
        .filter_map(|envelope| {
            let mut row = envelope.row.into_iter();
            let tag = row.next()?.as_str()?.to_string();
            let posts_count = row.next()?.as_i64()?;
            Some(TagCount { tag, posts_count })
        })
        .collect()
}
