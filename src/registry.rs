use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::operation::{BoxedOperation, FnOperation};

/// Registry of named operations.
///
/// This is the host's side of the contract: spec leaves declared by name are
/// resolved here at invocation time, so a name may be registered after the
/// status tree was built but must be present by the time the node is
/// performed.
#[derive(Default)]
pub struct OperationRegistry {
    ops: RwLock<HashMap<Arc<str>, BoxedOperation>>,
}

impl OperationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation under a name, replacing any previous entry
    pub async fn register(&self, name: &str, op: BoxedOperation) {
        self.ops.write().await.insert(Arc::from(name), op);
        debug!("Registered operation: {name}");
    }

    /// Register an async closure under a name
    pub async fn register_fn<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.register(name, FnOperation::boxed(f)).await;
    }

    /// Resolve a name to its operation
    pub async fn resolve(&self, name: &str) -> Option<BoxedOperation> {
        self.ops.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.ops.read().await.contains_key(name)
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ops.read().await.keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }
}
