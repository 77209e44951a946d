use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length for a configured property name
const MAX_NAME_LEN: usize = 64;

/// Pattern for configured property names: an identifier, optionally with a
/// leading `$` (the conventional marker for public alias properties)
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$?[A-Za-z_][A-Za-z0-9_]*$").expect("name pattern is valid"));

/// Naming and tuning options for a status tree.
///
/// A `Config` is passed explicitly into [`crate::OpsTree::build`]; there is no
/// process-wide configuration state. Hosts that embed several trees can give
/// each its own value.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix namespacing the generated status property
    pub prefix: String,

    /// Name of the generated status property; the actual storage key is
    /// `prefix + status_prop` (see [`Config::storage_key`])
    pub status_prop: String,

    /// Public alias under which [`crate::OpsTree::export`] also publishes the
    /// status snapshot
    pub alias_prop: String,

    /// Key under which a host options map carries its operation spec
    pub spec_prop: String,

    /// Capacity of the status event broadcast channel
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: "async_ops_".to_string(),
            status_prop: "async".to_string(),
            alias_prop: "$async".to_string(),
            spec_prop: "async_operations".to_string(),
            event_capacity: 64,
        }
    }
}

impl Config {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any name is empty, too long, or not a valid
    /// property name, or if the event capacity is zero
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_name(&self.prefix, "prefix")?;
        validate_name(&self.status_prop, "status property name")?;
        validate_name(&self.alias_prop, "alias property name")?;
        validate_name(&self.spec_prop, "spec property name")?;

        if self.event_capacity == 0 {
            anyhow::bail!("Event capacity must be greater than 0");
        }

        Ok(())
    }

    /// Storage key of the generated status property
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}{}", self.prefix, self.status_prop)
    }
}

/// Validate a configured property name
fn validate_name(value: &str, field_name: &str) -> anyhow::Result<()> {
    if value.is_empty() {
        anyhow::bail!("{field_name} cannot be empty");
    }

    if value.len() > MAX_NAME_LEN {
        anyhow::bail!("{field_name} cannot exceed {MAX_NAME_LEN} characters");
    }

    if !NAME_PATTERN.is_match(value) {
        anyhow::bail!(
            "{field_name} must start with a letter, underscore, or '$' and contain only \
             alphanumeric characters and underscores"
        );
    }

    Ok(())
}
