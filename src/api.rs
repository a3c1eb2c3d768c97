// External backend call that actually closes a table, supplied by the
// embedding client. The controller invokes it exactly once per close flow,
// during the requesting phase.
use anyhow::Result;
use async_trait::async_trait;

/// Outcome reported by the backend for a close-table request.
#[derive(Clone, Debug, Default)]
pub struct CloseTableOutcome {
    pub success: bool,
    /// Human-readable failure reason, when the backend provides one.
    pub error: Option<String>,
}

#[async_trait]
pub trait CloseTableApi: Send + Sync {
    async fn close_table(&self) -> Result<CloseTableOutcome>;
}
