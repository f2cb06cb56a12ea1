//! External capabilities consumed through narrow interfaces
//!
//! Media generation, text embedding and image segmentation run outside this
//! runtime. They are modelled as async traits so pipelines can be swapped
//! without touching the repositories or the tools that call them.

use crate::error::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::debug;

/// Kind of generated asset; matches the `type` column of `generations`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Music,
    SpriteVideo,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Music => "music",
            Self::SpriteVideo => "sprite_video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "music" => Ok(Self::Music),
            "sprite_video" => Ok(Self::SpriteVideo),
            other => Err(GenerationError::new(
                crate::error::GenerationErrorKind::InvalidRequest,
                format!("unknown media type '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: MediaKind,
    pub prompt: String,
    pub sprite_frames: Option<u32>,
    pub bpm: Option<u32>,
}

impl GenerationRequest {
    pub fn new(kind: MediaKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            sprite_frames: None,
            bpm: None,
        }
    }

    pub fn with_bpm(mut self, bpm: u32) -> Self {
        self.bpm = Some(bpm);
        self
    }

    pub fn with_sprite_frames(mut self, frames: u32) -> Self {
        self.sprite_frames = Some(frames);
        self
    }
}

/// Bytes produced by a generation pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAsset {
    pub kind: MediaKind,
    pub content: Vec<u8>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Masks and confidence scores for one image
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Segmentation {
    pub masks: Vec<Vec<u8>>,
    pub scores: Vec<f32>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedAsset, GenerationError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GenerationError>;
}

#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, content: &[u8]) -> Result<Segmentation, GenerationError>;
}

/// Cloneable signal that aborts an in-flight generation
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

#[derive(Debug, Default)]
struct InterruptInner {
    fired: AtomicBool,
    notify: Notify,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Resolve once [`Interrupt::fire`] has been called
    pub async fn fired(&self) {
        loop {
            // Register before checking the flag so a concurrent fire is not missed.
            let notified = self.inner.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

/// Run a generation, aborting with [`GenerationError::interrupted`] if the
/// interrupt fires first. The generator future is dropped on interrupt.
pub async fn run_generation(
    generator: &dyn Generator,
    request: GenerationRequest,
    interrupt: &Interrupt,
) -> Result<GeneratedAsset, GenerationError> {
    if interrupt.is_fired() {
        return Err(GenerationError::interrupted());
    }

    tokio::select! {
        biased;
        _ = interrupt.fired() => {
            debug!(kind = %request.kind, "Generation interrupted");
            Err(GenerationError::interrupted())
        }
        result = generator.generate(request.clone()) => result,
    }
}

/// Stand-in for every capability when no pipeline is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

#[async_trait]
impl Generator for Unavailable {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedAsset, GenerationError> {
        Err(GenerationError::unavailable(request.kind.as_str()))
    }
}

#[async_trait]
impl Embedder for Unavailable {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, GenerationError> {
        Err(GenerationError::unavailable("embedding"))
    }
}

#[async_trait]
impl Segmenter for Unavailable {
    async fn segment(&self, _content: &[u8]) -> Result<Segmentation, GenerationError> {
        Err(GenerationError::unavailable("segmentation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationErrorKind;
    use std::time::Duration;

    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GeneratedAsset, GenerationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(GeneratedAsset {
                kind: request.kind,
                content: vec![1, 2, 3],
                metadata: Default::default(),
            })
        }
    }

    #[test]
    fn media_kind_round_trips_column_values() {
        for kind in [MediaKind::Image, MediaKind::Music, MediaKind::SpriteVideo] {
            assert_eq!(kind.as_str().parse::<MediaKind>().unwrap(), kind);
        }
        assert!("video".parse::<MediaKind>().is_err());
        assert_eq!(
            serde_json::to_string(&MediaKind::SpriteVideo).unwrap(),
            "\"sprite_video\""
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_aborts_in_flight_generation() {
        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.fire();
        });

        let err = run_generation(
            &SlowGenerator,
            GenerationRequest::new(MediaKind::Image, "a cat"),
            &interrupt,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn generation_completes_without_interrupt() {
        let asset = run_generation(
            &SlowGenerator,
            GenerationRequest::new(MediaKind::Music, "a tune").with_bpm(90),
            &Interrupt::new(),
        )
        .await
        .unwrap();
        assert_eq!(asset.kind, MediaKind::Music);
    }

    #[tokio::test]
    async fn already_fired_interrupt_short_circuits() {
        let interrupt = Interrupt::new();
        interrupt.fire();
        let err = run_generation(
            &SlowGenerator,
            GenerationRequest::new(MediaKind::Image, "x"),
            &interrupt,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn unavailable_capabilities_fail_cleanly() {
        let err = Unavailable.embed("hello").await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Unavailable);
        let err = Unavailable.segment(&[]).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Unavailable);
    }
}
