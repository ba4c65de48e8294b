use async_trait::async_trait;

/// Result type for AI operations
pub type Result<T> = std::result::Result<T, String>;

use super::types::{AiRequest, AiResponse};

/// Seam to the external AI provider router.
///
/// The concrete router (tier-based model selection, provider pools, CLI
/// subprocess providers) lives outside this crate; the runtime only depends on
/// this narrow contract.
#[async_trait]
pub trait AiRouter: Send + Sync {
    /// Route one request to a provider and return the completed response.
    async fn process(&self, request: AiRequest) -> Result<AiResponse>;

    /// Check whether a named CLI provider is authenticated and usable.
    ///
    /// Used by the tool selector to gate CLI prompt tools.  Default: none are.
    async fn cli_provider_ready(&self, _provider: &str) -> bool {
        false
    }

    /// Get the router name (for usage accounting).
    fn router_name(&self) -> &str;
}
