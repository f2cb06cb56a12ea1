//! Generation records: insertion, lookup, similarity search and cached
//! segmentation

use chrono::{DateTime, Utc};
use conclave_core::{
    ConclaveResult, DatabaseError, Embedder, GeneratedAsset, GenerationError, GenerationId,
    MediaKind, Segmentation, Segmenter,
};
use rusqlite::{OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::cache::{CacheStats, SegmentationCache};
use crate::vector::{blob_to_f32_vec, cosine_similarity, f32_slice_to_blob};
use crate::worker::{SharedWorker, SqlValue, StoreResult, sqlite_error};

pub const DEFAULT_SPRITE_FRAMES: u32 = 4;
pub const DEFAULT_BPM: u32 = 120;
pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const DEFAULT_SEARCH_THRESHOLD: f32 = 0.7;

const SELECT_COLUMNS: &str =
    "id, type, prompt, content, created_at, sprite_frames, bpm, embedding, metadata";

/// Everything needed to insert a generation record
#[derive(Debug, Clone, PartialEq)]
pub struct NewGeneration {
    pub kind: MediaKind,
    pub prompt: String,
    pub content: Vec<u8>,
    pub sprite_frames: Option<u32>,
    pub bpm: Option<u32>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<Map<String, Value>>,
}

impl NewGeneration {
    pub fn new(kind: MediaKind, prompt: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            content,
            sprite_frames: None,
            bpm: None,
            embedding: None,
            metadata: None,
        }
    }

    /// Build a record from a pipeline's output, keeping its metadata
    pub fn from_asset(prompt: impl Into<String>, asset: GeneratedAsset) -> Self {
        Self {
            metadata: Some(asset.metadata),
            ..Self::new(asset.kind, prompt, asset.content)
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_bpm(mut self, bpm: u32) -> Self {
        self.bpm = Some(bpm);
        self
    }

    pub fn with_sprite_frames(mut self, frames: u32) -> Self {
        self.sprite_frames = Some(frames);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A stored generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: GenerationId,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub prompt: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub sprite_frames: Option<u32>,
    pub bpm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub metadata: Map<String, Value>,
}

/// Filter for [`GenerationRepository::query`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationQuery {
    pub kind: Option<MediaKind>,
    /// Case-insensitive substring of the prompt
    pub prompt_pattern: Option<String>,
    pub limit: Option<usize>,
}

/// A record ranked against a query embedding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: GenerationRecord,
    pub similarity: f32,
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Column values as read from SQLite, before validation
struct RawGeneration {
    id: String,
    kind: String,
    prompt: String,
    content: Vec<u8>,
    created_at: String,
    sprite_frames: Option<i64>,
    bpm: Option<i64>,
    embedding: Option<Vec<u8>>,
    metadata: String,
}

impl RawGeneration {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            prompt: row.get(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
            sprite_frames: row.get(5)?,
            bpm: row.get(6)?,
            embedding: row.get(7)?,
            metadata: row.get(8)?,
        })
    }

    fn into_record(self) -> StoreResult<GenerationRecord> {
        let corrupt = |what: &str, detail: String| {
            DatabaseError::new(format!(
                "corrupt generation row {}: {what}: {detail}",
                self.id
            ))
        };

        let id = GenerationId::parse(&self.id).map_err(|e| corrupt("id", e.to_string()))?;
        let kind: MediaKind = self
            .kind
            .parse()
            .map_err(|e: GenerationError| corrupt("type", e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt("created_at", e.to_string()))?
            .with_timezone(&Utc);
        let metadata = match serde_json::from_str(&self.metadata) {
            Ok(Value::Object(map)) => map,
            Ok(other) => return Err(corrupt("metadata", format!("expected object, got {other}"))),
            Err(e) => return Err(corrupt("metadata", e.to_string())),
        };

        Ok(GenerationRecord {
            id,
            kind,
            embedding: self.embedding.as_deref().and_then(blob_to_f32_vec),
            sprite_frames: self.sprite_frames.and_then(|v| u32::try_from(v).ok()),
            bpm: self.bpm.and_then(|v| u32::try_from(v).ok()),
            prompt: self.prompt,
            content: self.content,
            created_at,
            metadata,
        })
    }
}

fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len() + 2);
    escaped.push('%');
    for c in pattern.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Repository over the `generations` table.
///
/// The segmentation cache is private to the owning instance.
pub struct GenerationRepository {
    worker: Arc<SharedWorker>,
    embedder: Arc<dyn Embedder>,
    segmenter: Arc<dyn Segmenter>,
    cache: Mutex<SegmentationCache>,
}

impl GenerationRepository {
    pub fn new(
        worker: Arc<SharedWorker>,
        embedder: Arc<dyn Embedder>,
        segmenter: Arc<dyn Segmenter>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            worker,
            embedder,
            segmenter,
            cache: Mutex::new(SegmentationCache::new(cache_capacity)),
        }
    }

    fn cache(&self) -> MutexGuard<'_, SegmentationCache> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Insert one record atomically and return its id.
    ///
    /// Metadata defaults to `{"synced": false}` so the leader's maintenance
    /// pass picks the row up.
    pub async fn insert(&self, generation: NewGeneration) -> StoreResult<GenerationId> {
        let id = GenerationId::new();
        let mut metadata = generation.metadata.unwrap_or_default();
        metadata
            .entry("synced")
            .or_insert_with(|| Value::Bool(false));
        let metadata = Value::Object(metadata).to_string();
        let embedding = generation.embedding.as_deref().map(f32_slice_to_blob);
        let kind = generation.kind;
        let key = id.to_string();

        self.worker
            .call(move |conn| {
                let sql = "INSERT INTO generations
                        (id, type, prompt, content, sprite_frames, bpm, embedding, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";
                conn.execute(
                    sql,
                    params![
                        key,
                        kind.as_str(),
                        generation.prompt,
                        generation.content,
                        generation.sprite_frames.unwrap_or(DEFAULT_SPRITE_FRAMES),
                        generation.bpm.unwrap_or(DEFAULT_BPM),
                        embedding,
                        metadata
                    ],
                )
                .map_err(|e| sqlite_error(&e, Some(sql)))
            })
            .await?;

        info!(generation_id = %id, kind = %kind, "Stored generation");
        Ok(id)
    }

    pub async fn get(&self, id: GenerationId) -> StoreResult<Option<GenerationRecord>> {
        let key = id.to_string();
        let raw = self
            .worker
            .call(move |conn| {
                let sql = format!("SELECT {SELECT_COLUMNS} FROM generations WHERE id = ?1");
                conn.query_row(&sql, params![key], RawGeneration::from_row)
                    .optional()
                    .map_err(|e| sqlite_error(&e, Some(&sql)))
            })
            .await?;
        raw.map(RawGeneration::into_record).transpose()
    }

    /// Records matching `filter`, newest first
    pub async fn query(&self, filter: GenerationQuery) -> StoreResult<Vec<GenerationRecord>> {
        let mut conditions = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(kind) = filter.kind {
            params.push(SqlValue::Text(kind.as_str().to_string()));
            conditions.push(format!("type = ?{}", params.len()));
        }
        if let Some(pattern) = filter.prompt_pattern.as_deref() {
            params.push(SqlValue::Text(escape_like(pattern)));
            conditions.push(format!("prompt LIKE ?{} ESCAPE '\\'", params.len()));
        }

        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM generations");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            params.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
        }

        self.load_rows(sql, params).await
    }

    async fn load_rows(
        &self,
        sql: String,
        params: Vec<SqlValue>,
    ) -> StoreResult<Vec<GenerationRecord>> {
        let raw = self
            .worker
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql).map_err(|e| sqlite_error(&e, Some(&sql)))?;
                let rows = stmt
                    .query_map(params_from_iter(params.iter()), RawGeneration::from_row)
                    .map_err(|e| sqlite_error(&e, Some(&sql)))?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(|e| sqlite_error(&e, Some(&sql)))
            })
            .await?;
        raw.into_iter().map(RawGeneration::into_record).collect()
    }

    /// Rank stored records with an embedding against `embedding`.
    ///
    /// Rows scoring at least `threshold` are returned, best first, at most
    /// `limit` of them. Equal scores keep storage order (newest first).
    pub async fn similarity_search(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
        kind: Option<MediaKind>,
    ) -> StoreResult<Vec<SearchHit>> {
        let mut sql =
            format!("SELECT {SELECT_COLUMNS} FROM generations WHERE embedding IS NOT NULL");
        let mut params = Vec::new();
        if let Some(kind) = kind {
            sql.push_str(" AND type = ?1");
            params.push(SqlValue::Text(kind.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");

        let candidates = self.load_rows(sql, params).await?;
        let scanned = candidates.len();

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|record| {
                let similarity = cosine_similarity(embedding, record.embedding.as_deref()?);
                (similarity >= threshold).then_some(SearchHit { record, similarity })
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit);

        debug!(scanned, returned = hits.len(), threshold, "Similarity search");
        Ok(hits)
    }

    /// Embed `query` and rank stored images against it
    pub async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> ConclaveResult<Vec<SearchHit>> {
        let embedding = self.embedder.embed(query).await?;
        Ok(self
            .similarity_search(&embedding, limit, threshold, Some(MediaKind::Image))
            .await?)
    }

    /// Segment `content`, reusing a cached result for `id` when present
    pub async fn segment_with_cache(
        &self,
        content: &[u8],
        id: GenerationId,
    ) -> Result<Segmentation, GenerationError> {
        if let Some(cached) = self.cache().get(&id) {
            debug!(generation_id = %id, "Segmentation cache hit");
            return Ok(cached);
        }

        let segmentation = self.segmenter.segment(content).await?;
        if let Some(evicted) = self.cache().insert(id, segmentation.clone()) {
            debug!(generation_id = %evicted, "Evicted segmentation from cache");
        }
        Ok(segmentation)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache().stats()
    }

    /// Merge `patch` into a record's metadata (RFC 7396). Returns whether the
    /// record exists.
    pub async fn patch_metadata(&self, id: GenerationId, patch: Value) -> StoreResult<bool> {
        let key = id.to_string();
        let patch = patch.to_string();
        let changed = self
            .worker
            .call(move |conn| {
                let sql = "UPDATE generations SET metadata = json_patch(metadata, ?2) WHERE id = ?1";
                conn.execute(sql, params![key, patch])
                    .map_err(|e| sqlite_error(&e, Some(sql)))
            })
            .await?;
        Ok(changed > 0)
    }

    /// Ids of records still flagged `"synced": false`, oldest first
    pub async fn pending_sync(&self) -> StoreResult<Vec<GenerationId>> {
        let ids: Vec<String> = self
            .worker
            .call(|conn| {
                let sql = "SELECT id FROM generations
                     WHERE json_type(metadata, '$.synced') = 'false'
                     ORDER BY created_at, rowid";
                let mut stmt = conn.prepare(sql).map_err(|e| sqlite_error(&e, Some(sql)))?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(|e| sqlite_error(&e, Some(sql)))?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(|e| sqlite_error(&e, Some(sql)))
            })
            .await?;
        Ok(ids
            .iter()
            .filter_map(|id| GenerationId::parse(id).ok())
            .collect())
    }

    /// Flag records as synced in one transaction; returns the number updated
    pub async fn mark_synced(&self, ids: &[GenerationId]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = ids.iter().map(ToString::to_string).collect();
        self.worker
            .call(move |conn| {
                let sql = "UPDATE generations
                     SET metadata = json_set(metadata, '$.synced', json('true'))
                     WHERE id = ?1";
                let tx = conn.transaction().map_err(|e| sqlite_error(&e, None))?;
                let mut updated = 0;
                {
                    let mut stmt = tx.prepare(sql).map_err(|e| sqlite_error(&e, Some(sql)))?;
                    for key in &keys {
                        updated += stmt
                            .execute(params![key])
                            .map_err(|e| sqlite_error(&e, Some(sql)))?;
                    }
                }
                tx.commit().map_err(|e| sqlite_error(&e, None))?;
                Ok(updated)
            })
            .await
    }
}

/// Summary of a record without its content, for tool responses
pub fn record_summary(record: &GenerationRecord) -> Value {
    json!({
        "id": record.id,
        "type": record.kind,
        "prompt": record.prompt,
        "createdAt": record.created_at,
        "metadata": record.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::Unavailable;
    use conclave_testing::{CountingSegmenter, TableEmbedder, unit_vector_at};

    fn repository(embedder: TableEmbedder, segmenter: Arc<CountingSegmenter>) -> GenerationRepository {
        let worker = Arc::new(SharedWorker::in_memory().unwrap());
        GenerationRepository::new(worker, Arc::new(embedder), segmenter, 2)
    }

    fn plain() -> GenerationRepository {
        let worker = Arc::new(SharedWorker::in_memory().unwrap());
        GenerationRepository::new(worker, Arc::new(Unavailable), Arc::new(Unavailable), 4)
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let repo = plain();
        let id = repo
            .insert(
                NewGeneration::new(MediaKind::Music, "lofi beat", vec![1, 2, 3])
                    .with_bpm(90)
                    .with_embedding(vec![0.5, -0.25]),
            )
            .await
            .unwrap();

        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.kind, MediaKind::Music);
        assert_eq!(record.prompt, "lofi beat");
        assert_eq!(record.content, vec![1, 2, 3]);
        assert_eq!(record.bpm, Some(90));
        assert_eq!(record.sprite_frames, Some(DEFAULT_SPRITE_FRAMES));
        assert_eq!(record.embedding, Some(vec![0.5, -0.25]));
        assert_eq!(record.metadata["synced"], json!(false));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        assert!(plain().get(GenerationId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_filters_by_kind_and_escaped_pattern() {
        let repo = plain();
        repo.insert(NewGeneration::new(MediaKind::Image, "Red Fox", vec![0]))
            .await
            .unwrap();
        repo.insert(NewGeneration::new(MediaKind::Image, "100% blue", vec![0]))
            .await
            .unwrap();
        repo.insert(NewGeneration::new(MediaKind::Music, "fox trot", vec![0]))
            .await
            .unwrap();

        let foxes = repo
            .query(GenerationQuery {
                kind: Some(MediaKind::Image),
                prompt_pattern: Some("fox".into()),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(foxes.len(), 1);
        assert_eq!(foxes[0].prompt, "Red Fox");

        let percent = repo
            .query(GenerationQuery {
                prompt_pattern: Some("0%".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(percent.len(), 1);

        let all = repo.query(GenerationQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].prompt, "fox trot");

        let limited = repo
            .query(GenerationQuery {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn semantic_search_applies_threshold_and_order() {
        let embedder = TableEmbedder::new().with("query", vec![1.0, 0.0]);
        let repo = repository(embedder, Arc::new(CountingSegmenter::new()));

        for (prompt, cos) in [("mid", 0.75), ("low", 0.5), ("high", 0.9)] {
            repo.insert(
                NewGeneration::new(MediaKind::Image, prompt, vec![0]).with_embedding(unit_vector_at(cos)),
            )
            .await
            .unwrap();
        }
        // Not an image: never ranked by semantic search.
        repo.insert(
            NewGeneration::new(MediaKind::Music, "song", vec![0]).with_embedding(unit_vector_at(1.0)),
        )
        .await
        .unwrap();

        let hits = repo
            .semantic_search("query", DEFAULT_SEARCH_LIMIT, DEFAULT_SEARCH_THRESHOLD)
            .await
            .unwrap();

        let prompts: Vec<&str> = hits.iter().map(|h| h.record.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["high", "mid"]);
        assert!((hits[0].similarity - 0.9).abs() < 1e-5);
        assert!((hits[1].similarity - 0.75).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similarity_search_respects_limit() {
        let repo = plain();
        for _ in 0..4 {
            repo.insert(
                NewGeneration::new(MediaKind::Image, "same", vec![0]).with_embedding(vec![1.0, 1.0]),
            )
            .await
            .unwrap();
        }
        let hits = repo
            .similarity_search(&[1.0, 1.0], 3, 0.99, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn semantic_search_surfaces_embedder_failure() {
        let repo = plain();
        assert!(repo.semantic_search("anything", 5, 0.7).await.is_err());
    }

    #[tokio::test]
    async fn segmentation_is_cached_per_id() {
        let segmenter = Arc::new(CountingSegmenter::new());
        let repo = repository(TableEmbedder::new(), segmenter.clone());
        let (a, b, c) = (GenerationId::new(), GenerationId::new(), GenerationId::new());

        let first = repo.segment_with_cache(&[1, 2], a).await.unwrap();
        let again = repo.segment_with_cache(&[9, 9], a).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(segmenter.calls(), 1);

        repo.segment_with_cache(&[3], b).await.unwrap();
        repo.segment_with_cache(&[4], c).await.unwrap();
        // Capacity two: `a` was inserted first and is gone.
        repo.segment_with_cache(&[1, 2], a).await.unwrap();
        assert_eq!(segmenter.calls(), 4);

        let stats = repo.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.len, 2);
    }

    #[tokio::test]
    async fn sync_bookkeeping() {
        let repo = plain();
        let a = repo
            .insert(NewGeneration::new(MediaKind::Image, "a", vec![0]))
            .await
            .unwrap();
        let b = repo
            .insert(NewGeneration::new(MediaKind::Image, "b", vec![0]))
            .await
            .unwrap();
        assert_eq!(repo.pending_sync().await.unwrap(), vec![a, b]);

        assert_eq!(repo.mark_synced(&[a]).await.unwrap(), 1);
        assert_eq!(repo.pending_sync().await.unwrap(), vec![b]);

        assert!(repo
            .patch_metadata(b, json!({"synced": true, "source": "cli"}))
            .await
            .unwrap());
        assert!(repo.pending_sync().await.unwrap().is_empty());
        let record = repo.get(b).await.unwrap().unwrap();
        assert_eq!(record.metadata["source"], json!("cli"));

        assert!(!repo.patch_metadata(GenerationId::new(), json!({})).await.unwrap());
    }

    #[test]
    fn record_serializes_content_as_base64() {
        let record = GenerationRecord {
            id: GenerationId::new(),
            kind: MediaKind::SpriteVideo,
            prompt: "walk cycle".into(),
            content: vec![255],
            created_at: Utc::now(),
            sprite_frames: Some(8),
            bpm: None,
            embedding: None,
            metadata: Map::new(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], json!("sprite_video"));
        assert_eq!(value["content"], json!("/w=="));
        assert!(value.get("embedding").is_none());

        let back: GenerationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("a_b%c\\"), "%a\\_b\\%c\\\\%");
    }
}
