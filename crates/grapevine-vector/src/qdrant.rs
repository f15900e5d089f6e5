// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Qdrant backend for the per-user vector collections.
//!
//! Requires a running Qdrant server. Each user gets one cosine-distance
//! collection `telegram_posts_{user_id}` with payload indexes on
//! `channel_id` (integer), `posted_at` (keyword) and `tags` (keyword).
//! `posted_at` stays a keyword string: it is only used for coarse filters,
//! fine date bounds are applied after enrichment.

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use tracing::{debug, info};

use grapevine_core::GrapevineError;
use grapevine_core::traits::VectorIndex;
use grapevine_core::types::{ChunkPoint, VectorFilter, VectorHit};

use crate::points::collection_name;

fn vector_err(e: impl std::fmt::Display) -> GrapevineError {
    GrapevineError::Vector {
        message: e.to_string(),
    }
}

/// Qdrant-backed vector index.
pub struct QdrantIndex {
    client: Qdrant,
}

impl QdrantIndex {
    /// Connect to a Qdrant endpoint.
    pub fn new(url: &str, api_key: Option<&str>) -> Result<Self, GrapevineError> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder.build().map_err(vector_err)?;
        Ok(Self { client })
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, GrapevineError> {
        let collections = self.client.list_collections().await.map_err(vector_err)?;
        Ok(collections.collections.iter().any(|c| c.name == name))
    }

    fn build_filter(filter: &VectorFilter) -> Option<Filter> {
        let mut must = Vec::new();
        if let Some(channel_id) = filter.channel_id {
            must.push(Condition::matches("channel_id", channel_id));
        }
        if let Some(tags) = &filter.tags {
            if !tags.is_empty() {
                must.push(Condition::matches("tags", tags.clone()));
            }
        }
        if must.is_empty() {
            None
        } else {
            Some(Filter::must(must))
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(
        &self,
        user_id: i64,
        vector_size: usize,
    ) -> Result<(), GrapevineError> {
        let name = collection_name(user_id);
        if self.collection_exists(&name).await? {
            return Ok(());
        }

        info!(collection = %name, vector_size, "creating vector collection");
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&name).vectors_config(VectorParamsBuilder::new(
                    vector_size as u64,
                    Distance::Cosine,
                )),
            )
            .await
            .map_err(vector_err)?;

        for (field, field_type) in [
            ("channel_id", FieldType::Integer),
            ("posted_at", FieldType::Keyword),
            ("tags", FieldType::Keyword),
        ] {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &name, field, field_type,
                ))
                .await
                .map_err(vector_err)?;
        }
        Ok(())
    }

    async fn upsert_batch(
        &self,
        user_id: i64,
        points: Vec<ChunkPoint>,
    ) -> Result<(), GrapevineError> {
        if points.is_empty() {
            return Ok(());
        }
        let name = collection_name(user_id);
        let mut structs = Vec::with_capacity(points.len());
        for point in points {
            let payload_json = serde_json::to_value(&point.payload).map_err(vector_err)?;
            let payload: qdrant_client::Payload = payload_json.try_into().map_err(vector_err)?;
            structs.push(PointStruct::new(point.id, point.vector, payload));
        }
        debug!(collection = %name, points = structs.len(), "upserting chunk points");
        self.client
            .upsert_points(UpsertPointsBuilder::new(&name, structs))
            .await
            .map_err(vector_err)?;
        Ok(())
    }

    async fn search(
        &self,
        user_id: i64,
        query: &[f32],
        limit: usize,
        score_threshold: f32,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>, GrapevineError> {
        let name = collection_name(user_id);
        let mut builder = SearchPointsBuilder::new(&name, query.to_vec(), limit as u64)
            .with_payload(true)
            .score_threshold(score_threshold);
        if let Some(filter) = Self::build_filter(filter) {
            builder = builder.filter(filter);
        }

        let response = self.client.search_points(builder).await.map_err(vector_err)?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let id = match point.id.and_then(|id| id.point_id_options) {
                Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u,
                Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => n.to_string(),
                None => continue,
            };
            let payload_json = serde_json::Value::Object(
                point
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, value_to_json(v)))
                    .collect(),
            );
            match serde_json::from_value(payload_json) {
                Ok(payload) => hits.push(VectorHit {
                    id,
                    score: point.score,
                    payload,
                }),
                Err(e) => {
                    debug!(error = %e, "skipping point with undecodable payload");
                }
            }
        }
        Ok(hits)
    }

    async fn delete_by_posts(&self, user_id: i64, post_ids: &[i64]) -> Result<(), GrapevineError> {
        if post_ids.is_empty() {
            return Ok(());
        }
        let name = collection_name(user_id);
        if !self.collection_exists(&name).await? {
            return Ok(());
        }
        let filter = Filter::must([Condition::matches("post_id", post_ids.to_vec())]);
        self.client
            .delete_points(DeletePointsBuilder::new(&name).points(filter))
            .await
            .map_err(vector_err)?;
        Ok(())
    }

    async fn drop_collection(&self, user_id: i64) -> Result<(), GrapevineError> {
        let name = collection_name(user_id);
        if !self.collection_exists(&name).await? {
            return Ok(());
        }
        self.client.delete_collection(&name).await.map_err(vector_err)?;
        Ok(())
    }

    async fn count(&self, user_id: i64) -> Result<usize, GrapevineError> {
        let name = collection_name(user_id);
        if !self.collection_exists(&name).await? {
            return Ok(0);
        }
        let response = self
            .client
            .count(CountPointsBuilder::new(&name).exact(true))
            .await
            .map_err(vector_err)?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}

/// Convert a qdrant payload value into serde_json for typed decoding.
fn value_to_json(value: qdrant_client::qdrant::Value) -> serde_json::Value {
    use qdrant_client::qdrant::value::Kind;
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Value::from(d),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
    }
}

// Integration against a live Qdrant server is exercised in deployment
// smoke tests; unit coverage for index semantics lives in `memory.rs`,
// which implements the same trait.
