//! Generation, storage and search tools

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use conclave_core::{
    ConclaveResult, GenerationError, GenerationErrorKind, GenerationRequest, MediaKind,
    run_generation,
};
use conclave_store::{
    DEFAULT_SEARCH_LIMIT, DEFAULT_SEARCH_THRESHOLD, NewGeneration, SearchHit, record_summary,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use super::Services;

pub const VECTOR_SEARCH_LIMIT: usize = 10;
pub const VECTOR_SEARCH_THRESHOLD: f32 = 0.8;

#[derive(Debug, Deserialize)]
pub struct VectorSearchArgs {
    pub embedding: Vec<f32>,
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateImageArgs {
    pub prompt: String,
    pub style: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateMusicArgs {
    pub prompt: String,
    pub bpm: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchGenerationsArgs {
    pub query: String,
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    #[serde(default)]
    pub segment: bool,
}

#[derive(Debug, Deserialize)]
pub struct StoreGenerationArgs {
    #[serde(rename = "type")]
    pub kind: String,
    pub prompt: String,
    /// Base64-encoded bytes
    pub content: String,
    pub metadata: Option<Map<String, Value>>,
    pub embedding: Option<Vec<f32>>,
}

fn hit_summary(hit: &SearchHit) -> Value {
    let mut summary = record_summary(&hit.record);
    summary["similarity"] = json!(hit.similarity);
    summary
}

pub async fn vector_search(services: &Services, args: VectorSearchArgs) -> ConclaveResult<Value> {
    let hits = services
        .generations
        .similarity_search(
            &args.embedding,
            args.limit.unwrap_or(VECTOR_SEARCH_LIMIT),
            args.threshold.unwrap_or(VECTOR_SEARCH_THRESHOLD),
            None,
        )
        .await?;
    Ok(Value::Array(hits.iter().map(hit_summary).collect()))
}

pub async fn generate_image(
    services: &Services,
    args: GenerateImageArgs,
) -> ConclaveResult<Value> {
    let prompt = match args.style {
        Some(style) => format!("{style} style: {}", args.prompt),
        None => args.prompt,
    };

    let embedding = services.generations.embedder().embed(&prompt).await?;
    let asset = run_generation(
        services.generator.as_ref(),
        GenerationRequest::new(MediaKind::Image, prompt.clone()),
        &services.interrupt,
    )
    .await?;
    let id = services
        .generations
        .insert(NewGeneration::from_asset(prompt.clone(), asset).with_embedding(embedding))
        .await?;

    info!(generation_id = %id, "Image generated");
    Ok(json!({ "id": id, "type": MediaKind::Image, "prompt": prompt }))
}

pub async fn generate_music(
    services: &Services,
    args: GenerateMusicArgs,
) -> ConclaveResult<Value> {
    let mut request = GenerationRequest::new(MediaKind::Music, args.prompt.clone());
    if let Some(bpm) = args.bpm {
        request = request.with_bpm(bpm);
    }

    let asset = run_generation(
        services.generator.as_ref(),
        request,
        &services.interrupt,
    )
    .await?;
    let mut generation = NewGeneration::from_asset(args.prompt.clone(), asset);
    if let Some(bpm) = args.bpm {
        generation = generation.with_bpm(bpm);
    }
    let id = services.generations.insert(generation).await?;

    info!(generation_id = %id, "Music generated");
    Ok(json!({ "id": id, "type": MediaKind::Music, "prompt": args.prompt }))
}

/// Semantic search, optionally annotating each hit with its (cached)
/// segmentation
pub async fn search_generations(
    services: &Services,
    args: SearchGenerationsArgs,
) -> ConclaveResult<Value> {
    let hits = services
        .generations
        .semantic_search(
            &args.query,
            args.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            args.threshold.unwrap_or(DEFAULT_SEARCH_THRESHOLD),
        )
        .await?;

    let mut results = Vec::with_capacity(hits.len());
    for hit in &hits {
        let mut summary = hit_summary(hit);
        if args.segment {
            let segmentation = services
                .generations
                .segment_with_cache(&hit.record.content, hit.record.id)
                .await?;
            summary["segmentation"] = json!({
                "masks": segmentation.masks.len(),
                "scores": segmentation.scores,
            });
        }
        results.push(summary);
    }
    Ok(json!({ "results": results }))
}

pub async fn store_generation(
    services: &Services,
    args: StoreGenerationArgs,
) -> ConclaveResult<Value> {
    let kind: MediaKind = args.kind.parse()?;
    let content = BASE64.decode(args.content.as_bytes()).map_err(|e| {
        GenerationError::new(
            GenerationErrorKind::InvalidRequest,
            format!("content is not valid base64: {e}"),
        )
    })?;

    let mut generation = NewGeneration::new(kind, args.prompt, content);
    if let Some(metadata) = args.metadata {
        generation = generation.with_metadata(metadata);
    }
    if let Some(embedding) = args.embedding {
        generation = generation.with_embedding(embedding);
    }
    let id = services.generations.insert(generation).await?;
    Ok(json!({ "id": id }))
}
