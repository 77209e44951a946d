use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::config::Config;
use crate::dispatch::Outcome;
use crate::error::{OpsError, OpsResult};
use crate::events::StatusEvent;
use crate::operation::BoxedOperation;
use crate::registry::OperationRegistry;
use crate::spec::{display_path, OpSpec, OperationSpec};
use crate::status::{NodeKind, OpStatus};

/// Collaborators every node needs at invocation time
pub(crate) struct TreeShared {
    pub(crate) registry: Arc<OperationRegistry>,
    pub(crate) events: broadcast::Sender<StatusEvent>,
}

/// What a single node invokes
pub(crate) enum OpSource {
    /// Resolved on the registry when performed
    Named(String),
    /// Invoked directly
    Inline(BoxedOperation),
}

pub(crate) enum NodeBody {
    Single(OpSource),
    Batch(Vec<Arc<StatusNode>>),
}

/// One node of the status tree.
///
/// The tree mirrors the operation spec one-to-one: same keys, same nesting,
/// built once. Structure is immutable after construction; only the status
/// record behind the lock changes. Children are held by direct ownership, so
/// batch dispatch never addresses nodes through path strings.
pub struct StatusNode {
    pub(crate) path: String,
    pub(crate) key: String,
    pub(crate) status: RwLock<OpStatus>,
    pub(crate) body: NodeBody,
    pub(crate) shared: Arc<TreeShared>,
}

impl StatusNode {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Display path from the root, e.g. `"all.users"`
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match &self.body {
            NodeBody::Single(_) => NodeKind::Single,
            NodeBody::Batch(_) => NodeKind::Batch,
        }
    }

    /// Immediate children, empty for a single node
    #[must_use]
    pub fn children(&self) -> &[Arc<StatusNode>] {
        match &self.body {
            NodeBody::Single(_) => &[],
            NodeBody::Batch(children) => children,
        }
    }

    #[must_use]
    pub fn child(&self, key: &str) -> Option<Arc<StatusNode>> {
        self.children().iter().find(|c| c.key == key).cloned()
    }

    /// Current status record
    pub async fn status(&self) -> OpStatus {
        self.status.read().await.clone()
    }

    /// Status record plus nested children as JSON
    pub fn snapshot(&self) -> BoxFuture<'_, Value> {
        Box::pin(async move {
            let status = self.status.read().await.clone();
            let mut value = serde_json::to_value(&status).unwrap_or(Value::Null);

            if let NodeBody::Batch(children) = &self.body {
                let mut kids = Map::new();
                for child in children {
                    kids.insert(child.key.clone(), child.snapshot().await);
                }
                if let Value::Object(ref mut obj) = value {
                    obj.insert("children".to_string(), Value::Object(kids));
                }
            }

            value
        })
    }
}

/// Status tree for one declared operation spec.
///
/// Built once from a [`Config`], an [`OperationRegistry`], and an
/// [`OperationSpec`]; owned by the host that declared the spec and dropped
/// with it.
pub struct OpsTree {
    config: Config,
    roots: Vec<Arc<StatusNode>>,
    shared: Arc<TreeShared>,
}

impl std::fmt::Debug for OpsTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsTree")
            .field("config", &self.config)
            .field("roots", &self.roots.len())
            .finish()
    }
}

impl OpsTree {
    /// Build the status tree for a spec.
    ///
    /// Validates the config and the spec first, then creates one status node
    /// per spec entry in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::InvalidConfig`] or [`OpsError::InvalidSpec`] if
    /// validation fails.
    pub fn build(
        config: Config,
        registry: Arc<OperationRegistry>,
        spec: OperationSpec,
    ) -> OpsResult<Self> {
        config
            .validate()
            .map_err(|e| OpsError::InvalidConfig(e.to_string()))?;
        spec.validate()?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let shared = Arc::new(TreeShared { registry, events });
        let roots = build_nodes(spec.into_entries(), "", &shared);

        info!(
            "Built status tree '{}' with {} root node(s)",
            config.storage_key(),
            roots.len()
        );

        Ok(Self {
            config,
            roots,
            shared,
        })
    }

    /// Build from a host options map: the spec is taken out of `options`
    /// under the configured spec property. An absent key means the host
    /// declares no operations, and no tree is built.
    ///
    /// # Errors
    ///
    /// Same as [`OpsTree::build`] when the spec property is present.
    pub fn from_options(
        config: Config,
        registry: Arc<OperationRegistry>,
        options: &mut HashMap<String, OperationSpec>,
    ) -> OpsResult<Option<Self>> {
        match options.remove(&config.spec_prop) {
            Some(spec) => Ok(Some(Self::build(config, registry, spec)?)),
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Root nodes in declaration order
    #[must_use]
    pub fn roots(&self) -> &[Arc<StatusNode>] {
        &self.roots
    }

    /// Look up a node by path segments
    #[must_use]
    pub fn node(&self, path: &[&str]) -> Option<Arc<StatusNode>> {
        let (first, rest) = path.split_first()?;
        let mut current = self.roots.iter().find(|n| n.key == *first).cloned()?;
        for segment in rest {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// Current status record of the node at the given path
    pub async fn status(&self, path: &[&str]) -> Option<OpStatus> {
        Some(self.node(path)?.status().await)
    }

    /// Perform the node at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::UnknownPath`] if no node exists there, otherwise
    /// whatever the node's dispatch produces.
    pub async fn perform(&self, path: &[&str], args: Value) -> OpsResult<Outcome> {
        match self.node(path) {
            Some(node) => node.perform(args).await,
            None => Err(OpsError::UnknownPath(path.join("."))),
        }
    }

    /// Subscribe to status transition events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.events.subscribe()
    }

    /// Whole tree as JSON, keyed by spec keys
    pub async fn snapshot(&self) -> Value {
        let mut map = Map::new();
        for node in &self.roots {
            map.insert(node.key.clone(), node.snapshot().await);
        }
        Value::Object(map)
    }

    /// Snapshot wrapped for host consumption: published under the prefixed
    /// storage key and again under the public alias
    pub async fn export(&self) -> Value {
        let snapshot = self.snapshot().await;
        let mut out = Map::new();
        out.insert(self.config.storage_key(), snapshot.clone());
        out.insert(self.config.alias_prop.clone(), snapshot);
        Value::Object(out)
    }
}

fn build_nodes(
    entries: Vec<(String, OpSpec)>,
    parent_path: &str,
    shared: &Arc<TreeShared>,
) -> Vec<Arc<StatusNode>> {
    entries
        .into_iter()
        .map(|(key, spec)| build_node(parent_path, key, spec, shared))
        .collect()
}

fn build_node(
    parent_path: &str,
    key: String,
    spec: OpSpec,
    shared: &Arc<TreeShared>,
) -> Arc<StatusNode> {
    let path = display_path(parent_path, &key);

    let body = match spec {
        OpSpec::Named(name) => NodeBody::Single(OpSource::Named(name)),
        OpSpec::Handler(op) => NodeBody::Single(OpSource::Inline(op)),
        OpSpec::Batch(sub) => NodeBody::Batch(build_nodes(sub.into_entries(), &path, shared)),
    };

    let kind = match &body {
        NodeBody::Single(_) => NodeKind::Single,
        NodeBody::Batch(_) => NodeKind::Batch,
    };
    debug!("Created {kind} status node at '{path}'");

    Arc::new(StatusNode {
        path,
        key,
        status: RwLock::new(OpStatus::new(kind)),
        body,
        shared: Arc::clone(shared),
    })
}
