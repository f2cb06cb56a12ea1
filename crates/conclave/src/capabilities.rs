//! Pipelines an instance delegates media work to

use conclave_core::{Embedder, Generator, Segmenter, Unavailable};
use std::sync::Arc;

/// The generator, embedder and segmenter handed to an instance at start.
///
/// Any capability left unconfigured answers with an "unavailable" error.
#[derive(Clone)]
pub struct Capabilities {
    pub generator: Arc<dyn Generator>,
    pub embedder: Arc<dyn Embedder>,
    pub segmenter: Arc<dyn Segmenter>,
}

impl Capabilities {
    /// Every capability reports itself unavailable
    pub fn unavailable() -> Self {
        Self {
            generator: Arc::new(Unavailable),
            embedder: Arc::new(Unavailable),
            segmenter: Arc::new(Unavailable),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_segmenter(mut self, segmenter: Arc<dyn Segmenter>) -> Self {
        self.segmenter = segmenter;
        self
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{GenerationErrorKind, GenerationRequest, MediaKind};
    use conclave_testing::ScriptedGenerator;

    #[tokio::test]
    async fn defaults_are_unavailable() {
        let capabilities = Capabilities::default();
        let err = capabilities
            .generator
            .generate(GenerationRequest::new(MediaKind::Image, "cat"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Unavailable);
        assert!(capabilities.embedder.embed("cat").await.is_err());
    }

    #[tokio::test]
    async fn configured_generator_is_used() {
        let capabilities =
            Capabilities::unavailable().with_generator(Arc::new(ScriptedGenerator::new()));
        let asset = capabilities
            .generator
            .generate(GenerationRequest::new(MediaKind::Image, "cat"))
            .await
            .unwrap();
        assert_eq!(asset.content, b"cat".to_vec());
    }
}
