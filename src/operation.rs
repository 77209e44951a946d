use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// A single asynchronous operation.
///
/// Arguments and results travel as [`serde_json::Value`]; `Value::Null` stands
/// for "no arguments". A failed run carries the underlying error verbatim —
/// the dispatcher records it on the status node and propagates it to the
/// caller, always both.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Operation: Send + Sync {
    /// Execute the operation with the given arguments
    async fn run(&self, args: Value) -> Result<Value>;
}

/// Type alias for shared operation handles
pub type BoxedOperation = Arc<dyn Operation>;

/// Adapter turning an async closure into an [`Operation`].
pub struct FnOperation {
    handler: Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>,
}

impl FnOperation {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |args| Box::pin(f(args))),
        }
    }

    /// Shorthand producing a [`BoxedOperation`] directly
    pub fn boxed<F, Fut>(f: F) -> BoxedOperation
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl Operation for FnOperation {
    async fn run(&self, args: Value) -> Result<Value> {
        (self.handler)(args).await
    }
}
