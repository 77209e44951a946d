//! Reactive status tracking for declared trees of async operations.
//!
//! A host declares an [`OperationSpec`] - a nested mapping of names to async
//! operations or batches of them. Building an [`OpsTree`] from that spec
//! produces a mirrored tree of status records, one per entry. Performing a
//! node runs the underlying operation, drives the record through
//! pending/resolved/rejected, and broadcasts a [`StatusEvent`] for every
//! transition so observers can re-render.
//!
//! ```no_run
//! use async_ops::{Config, OperationRegistry, OperationSpec, OpsTree};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! # async fn demo() -> async_ops::OpsResult<()> {
//! let registry = Arc::new(OperationRegistry::new());
//! registry
//!     .register_fn("fetch_users", |_| async move { Ok(json!(["alice"])) })
//!     .await;
//!
//! let spec = OperationSpec::new()
//!     .named("users", "fetch_users")
//!     .op("posts", |_| async move { Ok(json!([])) });
//!
//! let tree = OpsTree::build(Config::default(), registry, spec)?;
//! let outcome = tree.perform(&["users"], Value::Null).await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod operation;
pub mod registry;
pub mod spec;
pub mod status;
pub mod tree;

pub use config::Config;
pub use dispatch::Outcome;
pub use error::{OpsError, OpsResult};
pub use events::{Phase, StatusEvent};
pub use operation::{BoxedOperation, FnOperation, Operation};
pub use registry::OperationRegistry;
pub use spec::{OpSpec, OperationSpec};
pub use status::{NodeKind, OpStatus};
pub use tree::{OpsTree, StatusNode};
