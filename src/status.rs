use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a status node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// One operation
    Single,
    /// A group of sibling operations invoked and awaited together
    Batch,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Single => write!(f, "single"),
            NodeKind::Batch => write!(f, "batch"),
        }
    }
}

/// Per-node status record.
///
/// All flags are `None` until the first invocation. Lifecycle:
/// `begin` on invocation start, then exactly one of `settle_ok` /
/// `settle_err` when the operation settles; a settled record re-enters the
/// pending state on the next `begin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpStatus {
    pub kind: NodeKind,
    pub pending: Option<bool>,
    pub resolved: Option<bool>,
    pub rejected: Option<bool>,
    /// Last failure, rendered with its full cause chain; `None` while not
    /// rejected
    pub error: Option<String>,
}

impl OpStatus {
    #[must_use]
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            pending: None,
            resolved: None,
            rejected: None,
            error: None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending == Some(true)
    }

    /// Reset for a fresh invocation
    pub(crate) fn begin(&mut self) {
        self.error = None;
        self.rejected = Some(false);
        self.resolved = Some(false);
        self.pending = Some(true);
    }

    pub(crate) fn settle_ok(&mut self) {
        self.pending = Some(false);
        self.resolved = Some(true);
    }

    pub(crate) fn settle_err(&mut self, message: impl Into<String>) {
        self.pending = Some(false);
        self.rejected = Some(true);
        self.error = Some(message.into());
    }
}
