use async_trait::async_trait;

use analyst_core::{OperationOutput, ProviderConfig};

use crate::error::ProviderError;

/// One logical call the executor may attempt several times.
///
/// Implementations must be safe to re-run with a different config: the
/// executor retries with the same config and may escalate to a fallback.
#[async_trait]
pub trait Operation: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, config: &ProviderConfig) -> Result<OperationOutput, ProviderError>;
}
