use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Monotonic JSON-RPC request id source shared by the worker and keep-alive.
#[derive(Debug, Clone, Default)]
pub struct RpcIdCounter(Arc<AtomicI64>);

impl RpcIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id, starting at 1.
    pub fn next_id(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Last id handed out (0 if none).
    pub fn current(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}
