//! # Conclave Testing
//!
//! Deterministic stand-ins for the external capabilities (generation,
//! embedding and segmentation), so repositories, tools and whole instances
//! can be exercised without any model behind them.
//!
//! ```
//! use conclave_core::Embedder;
//! use conclave_testing::TableEmbedder;
//!
//! # tokio_test::block_on(async {
//! let embedder = TableEmbedder::new().with("cat", vec![1.0, 0.0]);
//! assert_eq!(embedder.embed("cat").await.unwrap(), vec![1.0, 0.0]);
//! assert!(embedder.embed("dog").await.is_err());
//! # });
//! ```

use async_trait::async_trait;
use conclave_core::{
    Embedder, GeneratedAsset, GenerationError, GenerationRequest, Generator, Segmentation,
    Segmenter,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A generator that echoes the prompt back as content, with optional
/// per-prompt failures and an artificial delay
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    failures: HashMap<String, String>,
    delay: Option<Duration>,
    history: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail whenever `prompt` is requested
    pub fn with_failure(mut self, prompt: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(prompt.into(), message.into());
        self
    }

    /// Sleep before answering, to give interrupts something to abort
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    /// Requests received so far, in order
    pub fn call_history(&self) -> Vec<GenerationRequest> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedAsset, GenerationError> {
        self.history.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failures.get(&request.prompt) {
            return Err(GenerationError::failed(message.clone()));
        }

        let mut metadata = Map::new();
        metadata.insert("generator".into(), Value::from("scripted"));
        if let Some(bpm) = request.bpm {
            metadata.insert("bpm".into(), Value::from(bpm));
        }
        Ok(GeneratedAsset {
            kind: request.kind,
            content: request.prompt.into_bytes(),
            metadata,
        })
    }
}

/// An embedder backed by a fixed text-to-vector table; unknown text fails
#[derive(Debug, Clone, Default)]
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    fallback: Option<Vec<f32>>,
}

impl TableEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.table.insert(text.into(), embedding);
        self
    }

    /// Answer unknown text with `embedding` instead of failing
    pub fn with_fallback(mut self, embedding: Vec<f32>) -> Self {
        self.fallback = Some(embedding);
        self
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GenerationError> {
        self.table
            .get(text)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| GenerationError::failed(format!("no embedding for '{text}'")))
    }
}

/// A segmenter that returns the input as a single mask and counts its calls
#[derive(Debug, Default)]
pub struct CountingSegmenter {
    calls: AtomicUsize,
}

impl CountingSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Segmenter for CountingSegmenter {
    async fn segment(&self, content: &[u8]) -> Result<Segmentation, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Segmentation {
            masks: vec![content.to_vec()],
            scores: vec![1.0],
        })
    }
}

/// A unit vector in the plane whose cosine similarity to `[1, 0]` is `cos`
pub fn unit_vector_at(cos: f32) -> Vec<f32> {
    vec![cos, (1.0 - cos * cos).max(0.0).sqrt()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{GenerationErrorKind, Interrupt, MediaKind, run_generation};

    #[tokio::test]
    async fn scripted_generator_echoes_and_records() {
        let generator = ScriptedGenerator::new().with_failure("bad", "model exploded");

        let asset = generator
            .generate(GenerationRequest::new(MediaKind::Music, "tune").with_bpm(100))
            .await
            .unwrap();
        assert_eq!(asset.content, b"tune");
        assert_eq!(asset.metadata["bpm"], Value::from(100));

        let err = generator
            .generate(GenerationRequest::new(MediaKind::Image, "bad"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Failed);
        assert_eq!(generator.call_count(), 2);
        assert_eq!(generator.call_history()[1].prompt, "bad");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_generator_can_be_interrupted() {
        let generator = ScriptedGenerator::new().with_delay(Duration::from_secs(30));
        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.fire();
        });

        let err = run_generation(
            &generator,
            GenerationRequest::new(MediaKind::Image, "slow"),
            &interrupt,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn table_embedder_fallback() {
        let embedder = TableEmbedder::new().with_fallback(vec![0.0, 1.0]);
        assert_eq!(embedder.embed("anything").await.unwrap(), vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn counting_segmenter_counts() {
        let segmenter = CountingSegmenter::new();
        let result = segmenter.segment(&[7, 8]).await.unwrap();
        assert_eq!(result.masks, vec![vec![7, 8]]);
        assert_eq!(segmenter.calls(), 1);
    }

    #[test]
    fn unit_vector_has_requested_cosine() {
        let v = unit_vector_at(0.75);
        assert!((v[0] * v[0] + v[1] * v[1] - 1.0).abs() < 1e-6);
        assert_eq!(v[0], 0.75);
    }
}
