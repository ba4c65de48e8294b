//! `ReliableRouter` — retry + fallback wrapper around any [`AiRouter`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::ai::router::{AiRouter, Result};
use crate::ai::types::{AiRequest, AiResponse};

/// Wraps a primary router with retry-with-exponential-backoff and an
/// optional ordered fallback chain.
///
/// When every router in the chain fails, the returned error message starts
/// with `"All providers failed"` — the reasoning loop keys its
/// first-iteration apology off that prefix.
pub struct ReliableRouter {
    primary: Arc<dyn AiRouter>,
    fallbacks: Vec<Arc<dyn AiRouter>>,
    max_retries: u32,
    base_delay: Duration,
}

impl ReliableRouter {
    /// Create a new `ReliableRouter` with the given primary router.
    pub fn new(primary: Arc<dyn AiRouter>) -> Self {
        Self {
            primary,
            fallbacks: vec![],
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Set the retry configuration.
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    /// Add a fallback router tried after all retries on the primary fail.
    pub fn with_fallback(mut self, router: Arc<dyn AiRouter>) -> Self {
        self.fallbacks.push(router);
        self
    }
}

#[async_trait]
impl AiRouter for ReliableRouter {
    async fn process(&self, request: AiRequest) -> Result<AiResponse> {
        // Try primary with retries
        let mut last_err = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
            match self.primary.process(request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_err = e,
            }
        }

        // Retries exhausted — try fallbacks
        for fallback in &self.fallbacks {
            match fallback.process(request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_err = e,
            }
        }

        Err(format!("All providers failed. Last error: {last_err}"))
    }

    async fn cli_provider_ready(&self, provider: &str) -> bool {
        self.primary.cli_provider_ready(provider).await
    }

    fn router_name(&self) -> &str {
        self.primary.router_name()
    }
}
