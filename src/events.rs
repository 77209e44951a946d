use uuid::Uuid;

/// Phase of an operation invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Started,
    Resolved,
    Rejected,
}

/// Event emitted on every status transition.
///
/// The tree broadcasts one event per transition; hosts subscribe via
/// [`crate::OpsTree::subscribe`] and re-read whatever status they render.
/// The `path` is the node's display path ("all.users") - it identifies the
/// node for observers and is never parsed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub path: String,
    /// Correlation id shared by the events of one `perform` call
    pub invocation: Uuid,
    pub phase: Phase,
}
