use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use crate::error::{OpsError, OpsResult};
use crate::operation::{BoxedOperation, FnOperation};

/// Maximum length for a spec key
const MAX_KEY_LEN: usize = 128;
/// Maximum batch nesting depth
const MAX_DEPTH: usize = 16;

/// Pattern for spec keys - alphanumeric, hyphens, underscores, not starting
/// with a digit or hyphen
static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("key pattern is valid"));

/// A single entry in an operation spec.
pub enum OpSpec {
    /// Leaf resolved by name on the registry at invocation time
    Named(String),
    /// Leaf invoking an inline operation
    Handler(BoxedOperation),
    /// Nested batch of operations
    Batch(OperationSpec),
}

impl fmt::Debug for OpSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Handler(_) => f.write_str("Handler(..)"),
            Self::Batch(spec) => f.debug_tuple("Batch").field(spec).finish(),
        }
    }
}

/// User-declared tree of async operations.
///
/// Entries keep declaration order; a batch starts its children in that order.
/// The spec is consumed when a status tree is built from it and the tree's
/// structure never changes afterwards.
#[derive(Debug, Default)]
pub struct OperationSpec {
    entries: Vec<(String, OpSpec)>,
}

impl OperationSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a leaf resolved by name on the registry
    #[must_use]
    pub fn named(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.entries.push((key.into(), OpSpec::Named(name.into())));
        self
    }

    /// Declare a leaf invoking the given operation
    #[must_use]
    pub fn handler(mut self, key: impl Into<String>, op: BoxedOperation) -> Self {
        self.entries.push((key.into(), OpSpec::Handler(op)));
        self
    }

    /// Declare a leaf from an async closure
    #[must_use]
    pub fn op<F, Fut>(self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.handler(key, FnOperation::boxed(f))
    }

    /// Declare a nested batch
    #[must_use]
    pub fn batch(mut self, key: impl Into<String>, spec: OperationSpec) -> Self {
        self.entries.push((key.into(), OpSpec::Batch(spec)));
        self
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, OpSpec)] {
        &self.entries
    }

    pub(crate) fn into_entries(self) -> Vec<(String, OpSpec)> {
        self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate every key and the nesting structure.
    ///
    /// Malformed entries are a build-time error, never a silent drop: empty,
    /// overlong, or ill-formed keys, duplicate keys within one mapping, and
    /// nesting beyond [`MAX_DEPTH`] are all rejected.
    ///
    /// # Errors
    ///
    /// Returns [`OpsError::InvalidSpec`] naming the offending path.
    pub fn validate(&self) -> OpsResult<()> {
        self.validate_at("", 0)
    }

    fn validate_at(&self, parent_path: &str, depth: usize) -> OpsResult<()> {
        if depth > MAX_DEPTH {
            return Err(OpsError::InvalidSpec(format!(
                "batch nesting at '{parent_path}' exceeds maximum depth of {MAX_DEPTH}"
            )));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (key, spec) in &self.entries {
            let path = display_path(parent_path, key);

            validate_key(key, &path)?;

            if !seen.insert(key.as_str()) {
                return Err(OpsError::InvalidSpec(format!(
                    "duplicate key at '{path}'"
                )));
            }

            if let OpSpec::Named(name) = spec {
                if name.is_empty() {
                    return Err(OpsError::InvalidSpec(format!(
                        "empty operation name at '{path}'"
                    )));
                }
            }

            if let OpSpec::Batch(sub) = spec {
                sub.validate_at(&path, depth + 1)?;
            }
        }

        Ok(())
    }
}

/// Display path of a child key, for diagnostics only
pub(crate) fn display_path(parent_path: &str, key: &str) -> String {
    if parent_path.is_empty() {
        key.to_string()
    } else {
        format!("{parent_path}.{key}")
    }
}

/// Validate a single spec key
fn validate_key(key: &str, path: &str) -> OpsResult<()> {
    if key.is_empty() {
        return Err(OpsError::InvalidSpec("empty key".to_string()));
    }

    if key.len() > MAX_KEY_LEN {
        return Err(OpsError::InvalidSpec(format!(
            "key at '{path}' exceeds maximum length of {MAX_KEY_LEN}"
        )));
    }

    if !KEY_PATTERN.is_match(key) {
        return Err(OpsError::InvalidSpec(format!(
            "key at '{path}' may only contain alphanumeric characters, hyphens, and \
             underscores, and must not start with a digit or hyphen"
        )));
    }

    Ok(())
}
