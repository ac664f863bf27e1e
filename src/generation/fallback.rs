use super::{Generation, GenerationRequest, TextGenerator};
use crate::errors::GenerationError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Bounded wait on a primary generator, with one attempt on a fallback when
/// the primary times out or fails transiently.
///
/// A timed-out call is dropped, which releases whatever the in-flight
/// request held.
pub struct FallbackGenerator {
    primary: Arc<dyn TextGenerator>,
    fallback: Option<Arc<dyn TextGenerator>>,
    timeout: Duration,
}

impl FallbackGenerator {
    pub fn new(primary: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self {
            primary,
            fallback: None,
            timeout,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn TextGenerator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    async fn bounded(
        &self,
        generator: &dyn TextGenerator,
        request: &GenerationRequest,
    ) -> Result<Generation, GenerationError> {
        match tokio::time::timeout(self.timeout, generator.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl TextGenerator for FallbackGenerator {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let error = match self.bounded(self.primary.as_ref(), request).await {
            Ok(generation) => return Ok(generation),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(error);
        };
        if !error.is_retryable() {
            return Err(error);
        }

        warn!(
            primary = self.primary.name(),
            fallback = fallback.name(),
            error = %error,
            "Primary generator failed, trying fallback"
        );
        self.bounded(fallback.as_ref(), request).await
    }
}
