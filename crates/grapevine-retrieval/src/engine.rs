// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The retrieval engine: baseline vector search, hybrid re-ranking with
//! graph signals, and LLM answer synthesis.
//!
//! The graph is a signal, never a source of truth: every graph read here
//! degrades to empty on failure and the call still returns. Embedding
//! failure degrades a search to an empty result; only a broken vector
//! store surfaces as an error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use grapevine_core::GrapevineError;
use grapevine_core::traits::{ChatProvider, GraphStore, VectorIndex};
use grapevine_core::types::{ChatMessage, ChatRequest, TagCount, VectorFilter};
use grapevine_embeddings::EmbeddingService;
use grapevine_store::Database;
use grapevine_store::models::User;
use grapevine_store::queries::{history, posts};

/// The literal reply when retrieval produced no context.
pub const NO_CONTEXT_REPLY: &str =
    "информации в постах не найдено. Попробуйте переформулировать вопрос или уточнить период.";

const ANSWER_PROMPT: &str = r#"Ты — ассистент, отвечающий на вопросы по постам из Telegram-каналов
пользователя. Отвечай на русском, строго по приведённым контекстам. Если
контексты не покрывают вопрос, так и скажи: информация не найдена.
Ссылайся на источники в формате [@канал, дата].

Вопрос: {question}

Контексты:
{contexts}"#;

const EXPANSION_PROMPT: &str = r#"Перефразируй поисковый запрос так, чтобы он лучше находил посты
по смыслу: добавь синонимы и ключевые слова. Ответь только новым запросом,
без пояснений.

Запрос: {query}"#;

/// Days over which the recency bonus decays to zero.
const RECENCY_WINDOW_DAYS: f32 = 30.0;
/// How many top vector hits seed the graph expansion.
const EXPANSION_SEEDS: usize = 5;

/// Caller-supplied search restrictions. Date bounds are applied after the
/// vector search, since `posted_at` is only keyword-indexed in the store.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub channel_id: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

/// One retrieved post, enriched from the relational store.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub post_id: i64,
    pub channel_id: i64,
    pub channel_username: String,
    pub posted_at: DateTime<Utc>,
    pub text: String,
    pub url: Option<String>,
    pub tags: Vec<String>,
    pub vector_score: f32,
    pub combined_score: f32,
}

/// Result of `ask`: the synthesized answer with its sources, or a
/// structured error with `answer = None`.
#[derive(Debug)]
pub struct Answer {
    pub answer: Option<String>,
    pub sources: Vec<SearchHit>,
    pub context_used: usize,
    pub error: Option<String>,
}

/// Feature-flag defaults applied when a user has no explicit flags.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalDefaults {
    pub hybrid_search: bool,
    pub query_expansion: bool,
    pub graph_weight: f32,
}

impl Default for RetrievalDefaults {
    fn default() -> Self {
        Self {
            hybrid_search: true,
            query_expansion: false,
            graph_weight: 0.3,
        }
    }
}

/// Retrieval over a user's indexed posts.
pub struct RetrievalEngine {
    db: Database,
    vectors: Arc<dyn VectorIndex>,
    graph: Option<Arc<dyn GraphStore>>,
    embeddings: Arc<EmbeddingService>,
    chat: Arc<dyn ChatProvider>,
    score_threshold: f32,
    defaults: RetrievalDefaults,
}

impl RetrievalEngine {
    pub fn new(
        db: Database,
        vectors: Arc<dyn VectorIndex>,
        graph: Option<Arc<dyn GraphStore>>,
        embeddings: Arc<EmbeddingService>,
        chat: Arc<dyn ChatProvider>,
        score_threshold: f32,
        defaults: RetrievalDefaults,
    ) -> Self {
        Self {
            db,
            vectors,
            graph,
            embeddings,
            chat,
            score_threshold,
            defaults,
        }
    }

    /// Baseline retrieval: query embedding, filtered vector search,
    /// relational enrichment, post-hoc date filtering.
    pub async fn search(
        &self,
        query: &str,
        user: &User,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, GrapevineError> {
        let Some(query_vector) = self.embed_query(query).await else {
            return Ok(Vec::new());
        };
        let mut hits = self
            .vector_candidates(&query_vector, user, limit * 2, filters)
            .await?;
        hits.truncate(limit);
        Ok(hits)
    }

    /// Hybrid retrieval: the vector search runs in parallel with the graph
    /// rollups, top hits are expanded through the graph, and candidates
    /// are re-ranked with the combined score.
    pub async fn search_hybrid(
        &self,
        query: &str,
        user: &User,
        limit: usize,
        expand_graph: bool,
        graph_weight: f32,
    ) -> Result<Vec<SearchHit>, GrapevineError> {
        let Some(query_vector) = self.embed_query(query).await else {
            return Ok(Vec::new());
        };

        let filters = SearchFilters::default();
        let (candidates, signals) = tokio::join!(
            self.vector_candidates(&query_vector, user, limit * 2, &filters),
            self.graph_signals(user.telegram_id),
        );
        let mut hits = candidates?;
        let (interests, trending) = signals;

        let expanded: HashSet<i64> = if expand_graph {
            let seeds: Vec<i64> = hits
                .iter()
                .take(EXPANSION_SEEDS)
                .map(|h| h.post_id)
                .collect();
            self.graph_expansion(&seeds).await
        } else {
            HashSet::new()
        };

        let interest_tags: HashSet<&str> = interests.iter().map(|t| t.tag.as_str()).collect();
        let trending_tags: HashSet<&str> = trending.iter().map(|t| t.tag.as_str()).collect();
        let now = Utc::now();

        for hit in &mut hits {
            let graph_score =
                graph_score(hit, &interest_tags, &trending_tags, &expanded, now);
            hit.combined_score =
                (1.0 - graph_weight) * hit.vector_score + graph_weight * graph_score;
        }
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    /// Answer a question from the user's posts.
    ///
    /// Runs hybrid retrieval when the user's `hybrid_search` flag (or the
    /// configured default) allows it, composes the synthesis prompt and
    /// calls the chat provider. Provider failure yields `answer = None`
    /// with the error attached rather than an `Err`.
    pub async fn ask(
        &self,
        query: &str,
        user: &User,
        context_limit: usize,
    ) -> Result<Answer, GrapevineError> {
        if let Err(e) = history::record(&self.db, user.id, query, Utc::now()).await {
            warn!(user_id = user.id, error = %e, "query history write failed");
        }

        let hybrid = user
            .feature_flags
            .hybrid_search
            .unwrap_or(self.defaults.hybrid_search);
        let expansion = user
            .feature_flags
            .query_expansion
            .unwrap_or(self.defaults.query_expansion);

        let effective_query = if expansion {
            self.expand_query(query).await
        } else {
            query.to_string()
        };

        let retrieved = if hybrid {
            self.search_hybrid(
                &effective_query,
                user,
                context_limit,
                true,
                self.defaults.graph_weight,
            )
            .await
        } else {
            self.search(&effective_query, user, context_limit, &SearchFilters::default())
                .await
        };

        let hits = match retrieved {
            Ok(hits) => hits,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "retrieval failed");
                return Ok(Answer {
                    answer: None,
                    sources: Vec::new(),
                    context_used: 0,
                    error: Some(e.to_string()),
                });
            }
        };

        if hits.is_empty() {
            return Ok(Answer {
                answer: Some(NO_CONTEXT_REPLY.to_string()),
                sources: Vec::new(),
                context_used: 0,
                error: None,
            });
        }

        let prompt = ANSWER_PROMPT
            .replace("{question}", query)
            .replace("{contexts}", &render_contexts(&hits));
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: 1024,
            temperature: Some(0.2),
        };

        match self.chat.complete(request).await {
            Ok(response) => Ok(Answer {
                answer: Some(response.content),
                context_used: hits.len(),
                sources: hits,
                error: None,
            }),
            Err(e) => {
                warn!(user_id = user.id, error = %e, "answer synthesis failed");
                Ok(Answer {
                    answer: None,
                    context_used: hits.len(),
                    sources: hits,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Embed the query; a dead embedder degrades the search to empty.
    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        match self.embeddings.embed(query).await {
            Ok(embedded) => Some(embedded.vector),
            Err(e) => {
                warn!(error = %e, "query embedding failed, returning no results");
                None
            }
        }
    }

    /// Deduplicated per-post candidates from the vector store, enriched
    /// from the relational store, date-filtered, sorted by vector score.
    async fn vector_candidates(
        &self,
        query_vector: &[f32],
        user: &User,
        fetch_limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, GrapevineError> {
        let started = std::time::Instant::now();
        let store_filter = VectorFilter {
            channel_id: filters.channel_id,
            tags: filters.tags.clone(),
        };
        let raw = self
            .vectors
            .search(
                user.id,
                query_vector,
                fetch_limit,
                self.score_threshold,
                &store_filter,
            )
            .await?;
        metrics::histogram!("grapevine_search_seconds").record(started.elapsed().as_secs_f64());

        // Several chunks of one post may match; keep the best score.
        let mut best: HashMap<i64, f32> = HashMap::new();
        for hit in &raw {
            let entry = best.entry(hit.payload.post_id).or_insert(hit.score);
            if hit.score > *entry {
                *entry = hit.score;
            }
        }

        let ids: Vec<i64> = best.keys().copied().collect();
        let rows = posts::get_many(&self.db, ids).await?;
        let mut hits: Vec<SearchHit> = Vec::with_capacity(rows.len());
        for (post, channel_username) in self.with_channels(rows).await? {
            let Some(&score) = best.get(&post.id) else {
                continue;
            };
            if let Some(from) = filters.date_from {
                if post.posted_at < from {
                    continue;
                }
            }
            if let Some(to) = filters.date_to {
                if post.posted_at > to {
                    continue;
                }
            }
            hits.push(SearchHit {
                post_id: post.id,
                channel_id: post.channel_id,
                channel_username,
                posted_at: post.posted_at,
                text: post.text,
                url: post.url,
                tags: post.tags.unwrap_or_default(),
                vector_score: score,
                combined_score: score,
            });
        }
        sort_hits(&mut hits);
        Ok(hits)
    }

    async fn with_channels(
        &self,
        rows: Vec<grapevine_store::Post>,
    ) -> Result<Vec<(grapevine_store::Post, String)>, GrapevineError> {
        let mut names: HashMap<i64, String> = HashMap::new();
        let mut out = Vec::with_capacity(rows.len());
        for post in rows {
            let name = match names.get(&post.channel_id) {
                Some(name) => name.clone(),
                None => {
                    let name = grapevine_store::queries::channels::get_by_id(
                        &self.db,
                        post.channel_id,
                    )
                    .await?
                    .map(|c| c.channel_username)
                    .unwrap_or_default();
                    names.insert(post.channel_id, name.clone());
                    name
                }
            };
            out.push((post, name));
        }
        Ok(out)
    }

    /// Interest and trending rollups. Outages degrade to empty signals.
    async fn graph_signals(&self, telegram_id: i64) -> (Vec<TagCount>, Vec<TagCount>) {
        let Some(graph) = &self.graph else {
            return (Vec::new(), Vec::new());
        };
        let (interests, trending) = tokio::join!(
            graph.user_interests(telegram_id, 10),
            graph.trending_tags(7, 10),
        );
        (
            interests.unwrap_or_else(|e| {
                debug!(error = %e, "interest rollup unavailable");
                Vec::new()
            }),
            trending.unwrap_or_else(|e| {
                debug!(error = %e, "trending rollup unavailable");
                Vec::new()
            }),
        )
    }

    async fn graph_expansion(&self, seeds: &[i64]) -> HashSet<i64> {
        let Some(graph) = &self.graph else {
            return HashSet::new();
        };
        if seeds.is_empty() {
            return HashSet::new();
        }
        match graph.expand_posts(seeds, 5).await {
            Ok(expansions) => expansions
                .into_iter()
                .flat_map(|e| e.related.into_iter().map(|r| r.post_id))
                .collect(),
            Err(e) => {
                debug!(error = %e, "graph expansion unavailable");
                HashSet::new()
            }
        }
    }

    /// Rewrite the query through the auxiliary LLM; failure leaves the
    /// original in place.
    async fn expand_query(&self, query: &str) -> String {
        let request = ChatRequest {
            messages: vec![ChatMessage::user(
                EXPANSION_PROMPT.replace("{query}", query),
            )],
            max_tokens: 128,
            temperature: Some(0.3),
        };
        match self.chat.complete(request).await {
            Ok(response) if !response.content.trim().is_empty() => {
                debug!(original = query, expanded = %response.content.trim(), "query expanded");
                response.content.trim().to_string()
            }
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!(error = %e, "query expansion failed, keeping original");
                query.to_string()
            }
        }
    }
}

/// The graph side of the combined score. Each term is individually capped
/// so one loud signal cannot drown the rest.
fn graph_score(
    hit: &SearchHit,
    interests: &HashSet<&str>,
    trending: &HashSet<&str>,
    expanded: &HashSet<i64>,
    now: DateTime<Utc>,
) -> f32 {
    let interest_overlap = hit
        .tags
        .iter()
        .filter(|t| interests.contains(t.as_str()))
        .count() as f32;
    let trending_overlap = hit
        .tags
        .iter()
        .filter(|t| trending.contains(t.as_str()))
        .count() as f32;
    let expansion_bonus = if expanded.contains(&hit.post_id) {
        0.3
    } else {
        0.0
    };
    let age_days = (now - hit.posted_at).num_seconds() as f32 / 86_400.0;
    let recency = (0.2 * (1.0 - age_days / RECENCY_WINDOW_DAYS)).max(0.0);

    (0.1 * interest_overlap).min(0.3) + (0.1 * trending_overlap).min(0.2) + expansion_bonus + recency
}

/// Combined score descending, ties by vector score then by recency.
fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then(b.vector_score.total_cmp(&a.vector_score))
            .then(b.posted_at.cmp(&a.posted_at))
    });
}

fn render_contexts(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let url = hit.url.as_deref().unwrap_or("-");
            format!(
                "[{}] @{}, {}\n{}\n{}",
                i + 1,
                hit.channel_username,
                hit.posted_at.format("%Y-%m-%d"),
                url,
                hit.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use grapevine_core::types::{
        ChunkPayload, ChunkPoint, GraphExpansion, GraphNeighbor, GraphPost, PostGraphContext,
    };
    use grapevine_store::models::FeatureFlags;
    use grapevine_store::queries::{channels, users};
    use grapevine_store::NewPost;
    use grapevine_test_utils::{MockChat, MockEmbedder};
    use grapevine_vector::{chunk_point_id, MemoryIndex};

    /// Scripted graph: fixed interest/trending/expansion signals, optional
    /// outage mode.
    #[derive(Default)]
    struct FakeGraph {
        interests: Vec<TagCount>,
        trending: Vec<TagCount>,
        related: Vec<(i64, i64)>,
        failing: std::sync::atomic::AtomicBool,
    }

    impl FakeGraph {
        fn check(&self) -> Result<(), GrapevineError> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(GrapevineError::Graph {
                    message: "graph down".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl GraphStore for FakeGraph {
        async fn upsert_post(&self, _post: &GraphPost) -> Result<(), GrapevineError> {
            self.check()
        }

        async fn user_interests(
            &self,
            _telegram_id: i64,
            _limit: usize,
        ) -> Result<Vec<TagCount>, GrapevineError> {
            self.check()?;
            Ok(self.interests.clone())
        }

        async fn trending_tags(
            &self,
            _days: u32,
            _limit: usize,
        ) -> Result<Vec<TagCount>, GrapevineError> {
            self.check()?;
            Ok(self.trending.clone())
        }

        async fn expand_posts(
            &self,
            post_ids: &[i64],
            _limit_per_post: usize,
        ) -> Result<Vec<GraphExpansion>, GrapevineError> {
            self.check()?;
            Ok(post_ids
                .iter()
                .map(|&source| GraphExpansion {
                    source_post_id: source,
                    related: self
                        .related
                        .iter()
                        .filter(|(from, _)| *from == source)
                        .map(|&(_, to)| GraphNeighbor {
                            post_id: to,
                            shared_tags: 2,
                        })
                        .collect(),
                })
                .collect())
        }

        async fn post_context(
            &self,
            _post_id: i64,
        ) -> Result<Option<PostGraphContext>, GrapevineError> {
            self.check()?;
            Ok(None)
        }

        async fn delete_posts(&self, _post_ids: &[i64]) -> Result<(), GrapevineError> {
            self.check()
        }

        async fn delete_user(&self, _telegram_id: i64) -> Result<(), GrapevineError> {
            self.check()
        }
    }

    struct Fixture {
        db: Database,
        index: Arc<MemoryIndex>,
        embedder: Arc<MockEmbedder>,
        chat: Arc<MockChat>,
        user: User,
        channel_id: i64,
    }

    async fn fixture(graph: Option<Arc<FakeGraph>>, chat: Arc<MockChat>) -> (Fixture, RetrievalEngine) {
        let db = Database::open_in_memory().await.unwrap();
        let user = users::upsert(&db, 20000001, None, None).await.unwrap();
        let channel = channels::get_or_create(&db, "ai_news").await.unwrap();
        channels::subscribe(&db, user.id, channel.id).await.unwrap();

        let index = Arc::new(MemoryIndex::new());
        index.ensure_collection(user.id, 2).await.unwrap();
        let embedder = Arc::new(MockEmbedder::named("primary", 2, 64, 8));
        embedder.fix_vector(vec![1.0, 0.0]);
        let embeddings = Arc::new(EmbeddingService::new(embedder.clone(), None, None));

        let engine = RetrievalEngine::new(
            db.clone(),
            index.clone(),
            graph.map(|g| g as Arc<dyn GraphStore>),
            embeddings,
            chat.clone(),
            0.0,
            RetrievalDefaults::default(),
        );
        let fixture = Fixture {
            db,
            index,
            embedder,
            chat,
            user,
            channel_id: channel.id,
        };
        (fixture, engine)
    }

    /// Insert a post row and its single chunk point with a hand-built vector.
    async fn seed_post(
        f: &Fixture,
        message_id: i64,
        text: &str,
        tags: &[&str],
        age_days: i64,
        vector: Vec<f32>,
    ) -> i64 {
        let posted_at = Utc::now() - Duration::days(age_days);
        let id = posts::insert_batch(
            &f.db,
            f.user.id,
            f.channel_id,
            vec![NewPost {
                telegram_message_id: message_id,
                text: text.to_string(),
                views: None,
                url: Some(format!("https://t.me/ai_news/{message_id}")),
                posted_at,
            }],
        )
        .await
        .unwrap()[0];
        if !tags.is_empty() {
            let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
            posts::set_tags(&f.db, id, &tags).await.unwrap();
        }

        f.index
            .upsert_batch(
                f.user.id,
                vec![ChunkPoint {
                    id: chunk_point_id(id, 0),
                    vector,
                    payload: ChunkPayload {
                        post_id: id,
                        channel_id: f.channel_id,
                        channel_username: "ai_news".to_string(),
                        posted_at: grapevine_core::time::to_db_timestamp(posted_at),
                        tags: tags.iter().map(|t| t.to_string()).collect(),
                        url: None,
                        views: None,
                        chunk_index: 0,
                        total_chunks: 1,
                        embedding_provider: "primary".to_string(),
                    },
                }],
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn baseline_search_returns_owned_posts_by_similarity() {
        let (f, engine) = fixture(None, Arc::new(MockChat::new())).await;
        let close = seed_post(&f, 1, "про ИИ", &["ai"], 1, vec![1.0, 0.1]).await;
        let far = seed_post(&f, 2, "про еду", &["food"], 1, vec![0.1, 1.0]).await;

        let hits = engine
            .search("искусственный интеллект", &f.user, 5, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].post_id, close);
        assert_eq!(hits[1].post_id, far);
        assert!(hits[0].vector_score > hits[1].vector_score);
        assert_eq!(hits[0].channel_username, "ai_news");
    }

    #[tokio::test]
    async fn date_filters_are_applied_after_the_vector_search() {
        let (f, engine) = fixture(None, Arc::new(MockChat::new())).await;
        seed_post(&f, 1, "старый", &[], 40, vec![1.0, 0.0]).await;
        let fresh = seed_post(&f, 2, "свежий", &[], 2, vec![1.0, 0.0]).await;

        let filters = SearchFilters {
            date_from: Some(Utc::now() - Duration::days(7)),
            ..SearchFilters::default()
        };
        let hits = engine.search("запрос", &f.user, 5, &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post_id, fresh);
    }

    #[tokio::test]
    async fn hybrid_prefers_interest_overlap_on_equal_vector_scores() {
        let graph = Arc::new(FakeGraph {
            interests: vec![TagCount {
                tag: "ai".to_string(),
                posts_count: 42,
            }],
            ..FakeGraph::default()
        });
        let (f, engine) = fixture(Some(graph), Arc::new(MockChat::new())).await;
        // Same vector, same day: only the tags differ.
        let p2 = seed_post(&f, 2, "пост без пересечений", &["cooking"], 3, vec![1.0, 0.5]).await;
        let p1 = seed_post(&f, 1, "пост про ИИ", &["ai"], 3, vec![1.0, 0.5]).await;

        let hits = engine
            .search_hybrid("нейросети", &f.user, 5, true, 0.3)
            .await
            .unwrap();
        assert_eq!(hits[0].post_id, p1, "interest overlap must win the tie");
        assert_eq!(hits[1].post_id, p2);
        assert!(hits[0].combined_score > hits[1].combined_score);
        assert_eq!(hits[0].vector_score, hits[1].vector_score);
    }

    #[tokio::test]
    async fn zero_graph_weight_reproduces_the_baseline_order() {
        let graph = Arc::new(FakeGraph {
            interests: vec![TagCount {
                tag: "ai".to_string(),
                posts_count: 42,
            }],
            trending: vec![TagCount {
                tag: "crypto".to_string(),
                posts_count: 7,
            }],
            ..FakeGraph::default()
        });
        let (f, engine) = fixture(Some(graph), Arc::new(MockChat::new())).await;
        seed_post(&f, 1, "a", &["ai"], 1, vec![1.0, 0.3]).await;
        seed_post(&f, 2, "b", &["crypto"], 2, vec![1.0, 0.1]).await;
        seed_post(&f, 3, "c", &[], 3, vec![0.5, 1.0]).await;

        let baseline = engine
            .search("q", &f.user, 3, &SearchFilters::default())
            .await
            .unwrap();
        let hybrid = engine
            .search_hybrid("q", &f.user, 3, true, 0.0)
            .await
            .unwrap();
        let baseline_ids: Vec<i64> = baseline.iter().map(|h| h.post_id).collect();
        let hybrid_ids: Vec<i64> = hybrid.iter().map(|h| h.post_id).collect();
        assert_eq!(baseline_ids, hybrid_ids);
    }

    #[tokio::test]
    async fn graph_expansion_boosts_related_posts() {
        let (f, engine_no_graph) = fixture(None, Arc::new(MockChat::new())).await;
        // Best match plus a weaker one the graph links to it.
        let top = seed_post(&f, 1, "топ", &[], 2, vec![1.0, 0.0]).await;
        let boosted = seed_post(&f, 2, "связанный", &[], 2, vec![0.8, 0.6]).await;
        let plain = seed_post(&f, 3, "просто", &[], 2, vec![0.85, 0.5]).await;
        drop(engine_no_graph);

        let graph = Arc::new(FakeGraph {
            related: vec![(top, boosted)],
            ..FakeGraph::default()
        });
        let chat = Arc::new(MockChat::new());
        let db = f.db.clone();
        let embeddings = Arc::new(EmbeddingService::new(f.embedder.clone(), None, None));
        let engine = RetrievalEngine::new(
            db,
            f.index.clone(),
            Some(graph as Arc<dyn GraphStore>),
            embeddings,
            chat,
            0.0,
            RetrievalDefaults::default(),
        );

        let hits = engine
            .search_hybrid("q", &f.user, 3, true, 0.3)
            .await
            .unwrap();
        assert_eq!(hits[0].post_id, top);
        assert_eq!(
            hits[1].post_id, boosted,
            "expansion bonus must outweigh the small vector gap"
        );
        assert_eq!(hits[2].post_id, plain);
    }

    #[tokio::test]
    async fn graph_outage_degrades_to_vector_order() {
        let graph = Arc::new(FakeGraph::default());
        graph
            .failing
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let (f, engine) = fixture(Some(graph), Arc::new(MockChat::new())).await;
        let a = seed_post(&f, 1, "a", &["ai"], 1, vec![1.0, 0.1]).await;
        let b = seed_post(&f, 2, "b", &["ml"], 1, vec![0.4, 1.0]).await;

        let hits = engine
            .search_hybrid("q", &f.user, 5, true, 0.3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].post_id, a);
        assert_eq!(hits[1].post_id, b);
    }

    #[tokio::test]
    async fn dead_embedder_returns_empty_not_error() {
        let (f, engine) = fixture(None, Arc::new(MockChat::new())).await;
        seed_post(&f, 1, "a", &[], 1, vec![1.0, 0.0]).await;
        f.embedder.set_failing(true);

        let hits = engine
            .search("q", &f.user, 5, &SearchFilters::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn ask_composes_the_contract_prompt_and_records_history() {
        let chat = Arc::new(MockChat::with_responses(vec![
            "Ответ по постам [@ai_news, 2026-08-04]".to_string(),
        ]));
        let (f, engine) = fixture(None, chat).await;
        seed_post(&f, 1, "OpenAI выпустила модель", &["ai"], 1, vec![1.0, 0.0]).await;

        let answer = engine
            .ask("что нового у OpenAI?", &f.user, 5)
            .await
            .unwrap();
        assert_eq!(
            answer.answer.as_deref(),
            Some("Ответ по постам [@ai_news, 2026-08-04]")
        );
        assert_eq!(answer.context_used, 1);
        assert_eq!(answer.sources.len(), 1);
        assert!(answer.error.is_none());

        let requests = f.chat.requests().await;
        let prompt = &requests[0].messages[0].content;
        assert!(prompt.contains("что нового у OpenAI?"));
        assert!(prompt.contains("@ai_news"));
        assert!(prompt.contains("OpenAI выпустила модель"));
        assert!(prompt.contains("https://t.me/ai_news/1"));
        assert!(prompt.contains("[@канал, дата]"));

        let recorded = history::recent(&f.db, f.user.id, 5).await.unwrap();
        assert_eq!(recorded[0].0, "что нового у OpenAI?");
    }

    #[tokio::test]
    async fn ask_without_context_states_not_found() {
        let (f, engine) = fixture(None, Arc::new(MockChat::new())).await;
        let answer = engine.ask("пустой корпус", &f.user, 5).await.unwrap();
        assert!(answer.answer.unwrap().contains("информации в постах не найдено"));
        assert_eq!(answer.context_used, 0);
        assert_eq!(f.chat.call_count().await, 0, "no synthesis without context");
    }

    #[tokio::test]
    async fn ask_llm_failure_yields_structured_error() {
        let chat = Arc::new(MockChat::new());
        chat.fail_next().await;
        let (f, engine) = fixture(None, chat).await;
        seed_post(&f, 1, "пост", &[], 1, vec![1.0, 0.0]).await;

        let answer = engine.ask("вопрос", &f.user, 5).await.unwrap();
        assert!(answer.answer.is_none());
        assert!(answer.error.unwrap().contains("mock chat failure"));
        assert_eq!(answer.context_used, 1);
    }

    #[tokio::test]
    async fn query_expansion_flag_rewrites_before_embedding() {
        let chat = Arc::new(MockChat::with_responses(vec![
            "нейросети машинное обучение".to_string(),
            "Ответ".to_string(),
        ]));
        let (mut f, engine) = fixture(None, chat).await;
        users::set_feature_flags(
            &f.db,
            20000001,
            &FeatureFlags {
                query_expansion: Some(true),
                hybrid_search: Some(false),
                mentions_enabled: None,
            },
        )
        .await
        .unwrap();
        f.user = users::get_by_telegram_id(&f.db, 20000001)
            .await
            .unwrap()
            .unwrap();
        seed_post(&f, 1, "пост", &[], 1, vec![1.0, 0.0]).await;

        let answer = engine.ask("ии", &f.user, 5).await.unwrap();
        assert_eq!(answer.answer.as_deref(), Some("Ответ"));

        let requests = f.chat.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(requests[0].messages[0].content.contains("Запрос: ии"));
        // The synthesis prompt still carries the user's literal question.
        assert!(requests[1].messages[0].content.contains("Вопрос: ии"));
    }

    #[tokio::test]
    async fn expansion_failure_keeps_the_original_query() {
        let chat = Arc::new(MockChat::with_responses(vec!["Ответ".to_string()]));
        chat.fail_next().await;
        let (mut f, engine) = fixture(None, chat).await;
        users::set_feature_flags(
            &f.db,
            20000001,
            &FeatureFlags {
                query_expansion: Some(true),
                hybrid_search: Some(false),
                mentions_enabled: None,
            },
        )
        .await
        .unwrap();
        f.user = users::get_by_telegram_id(&f.db, 20000001)
            .await
            .unwrap()
            .unwrap();
        seed_post(&f, 1, "пост", &[], 1, vec![1.0, 0.0]).await;

        let answer = engine.ask("вопрос", &f.user, 5).await.unwrap();
        assert_eq!(answer.answer.as_deref(), Some("Ответ"));
    }
}
