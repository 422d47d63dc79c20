//! Script definitions: the immutable unit of work handed to the engine.
//!
//! A [`ScriptDefinition`] is built once by the loader, validated, and then
//! shared read-only between workers for the lifetime of a run.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Name used in `scripts.yml` for fire-and-forget statements.
pub const SCRIPT_KIND_COMMAND: &str = "command";

/// Name used in `scripts.yml` for result-returning statements.
pub const SCRIPT_KIND_QUERY: &str = "query";

/// Legacy spelling of [`SCRIPT_KIND_QUERY`] accepted by the loader.
pub const SCRIPT_KIND_SELECT_ALIAS: &str = "select";

// ---------------------------------------------------------------------------
// ScriptKind
// ---------------------------------------------------------------------------

/// How a script is executed and what its result carries.
///
/// Both kinds run in autocommit mode; they differ only in whether the
/// returned rows are materialized into the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    /// Execute and discard any result set. Success means no error.
    Command,
    /// Execute and materialize every returned row.
    #[serde(alias = "select")]
    Query,
}

impl ScriptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => SCRIPT_KIND_COMMAND,
            Self::Query => SCRIPT_KIND_QUERY,
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            SCRIPT_KIND_COMMAND => Ok(Self::Command),
            SCRIPT_KIND_QUERY | SCRIPT_KIND_SELECT_ALIAS => Ok(Self::Query),
            other => Err(CoreError::config(format!(
                "Unknown script type \"{other}\" (expected \"{SCRIPT_KIND_COMMAND}\" or \"{SCRIPT_KIND_QUERY}\")"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptDefinition
// ---------------------------------------------------------------------------

/// One named SQL script.
///
/// Constructed through [`ScriptDefinition::new`], which rejects blank names
/// and blank SQL. Name uniqueness is a property of the whole script set and
/// is checked by [`validate_unique_names`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDefinition {
    name: String,
    sql: String,
    kind: ScriptKind,
    timeout: Option<Duration>,
}

impl ScriptDefinition {
    pub fn new(
        name: impl Into<String>,
        sql: impl Into<String>,
        kind: ScriptKind,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        let sql = sql.into();

        if name.trim().is_empty() {
            return Err(CoreError::config("Script name must not be empty"));
        }
        if sql.trim().is_empty() {
            return Err(CoreError::config(format!(
                "Script \"{name}\" has an empty sql body"
            )));
        }

        Ok(Self {
            name,
            sql,
            kind,
            timeout: None,
        })
    }

    /// Attach a per-script execution timeout.
    ///
    /// A zero duration is rejected: it would fail every execution.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, CoreError> {
        if timeout.is_zero() {
            return Err(CoreError::config(format!(
                "Script \"{}\" has a zero timeout",
                self.name
            )));
        }
        self.timeout = Some(timeout);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    /// Per-script timeout, if one was configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Ensure no two definitions share a name.
///
/// Names key the run report, so a duplicate would make one result shadow
/// another.
pub fn validate_unique_names(scripts: &[ScriptDefinition]) -> Result<(), CoreError> {
    let mut seen = std::collections::HashSet::with_capacity(scripts.len());
    for script in scripts {
        if !seen.insert(script.name()) {
            return Err(CoreError::config(format!(
                "Duplicate script name: \"{}\"",
                script.name()
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn kind_parses_known_names() {
        assert_eq!("command".parse::<ScriptKind>().unwrap(), ScriptKind::Command);
        assert_eq!("query".parse::<ScriptKind>().unwrap(), ScriptKind::Query);
        assert_eq!(" Query ".parse::<ScriptKind>().unwrap(), ScriptKind::Query);
    }

    #[test]
    fn kind_accepts_select_alias() {
        assert_eq!("select".parse::<ScriptKind>().unwrap(), ScriptKind::Query);
    }

    #[test]
    fn kind_rejects_unknown_name() {
        let err = "procedure".parse::<ScriptKind>().unwrap_err();
        assert_matches!(err, CoreError::Configuration(msg) if msg.contains("procedure"));
    }

    #[test]
    fn kind_display_matches_config_spelling() {
        assert_eq!(ScriptKind::Command.to_string(), "command");
        assert_eq!(ScriptKind::Query.to_string(), "query");
    }

    #[test]
    fn definition_rejects_blank_name() {
        assert!(ScriptDefinition::new("  ", "SELECT 1", ScriptKind::Query).is_err());
    }

    #[test]
    fn definition_rejects_blank_sql() {
        let err = ScriptDefinition::new("empty", "\n  \n", ScriptKind::Command).unwrap_err();
        assert_matches!(err, CoreError::Configuration(msg) if msg.contains("empty"));
    }

    #[test]
    fn definition_keeps_multiline_sql_verbatim() {
        let sql = "SELECT 1\nas VALUE\n";
        let def = ScriptDefinition::new("check", sql, ScriptKind::Query).unwrap();
        assert_eq!(def.sql(), sql);
        assert_eq!(def.timeout(), None);
    }

    #[test]
    fn zero_timeout_rejected() {
        let def = ScriptDefinition::new("slow", "SELECT 1", ScriptKind::Query).unwrap();
        assert!(def.with_timeout(Duration::ZERO).is_err());
    }

    #[test]
    fn unique_names_accepts_distinct() {
        let scripts = vec![
            ScriptDefinition::new("a", "SELECT 1", ScriptKind::Query).unwrap(),
            ScriptDefinition::new("b", "SELECT 2", ScriptKind::Command).unwrap(),
        ];
        assert!(validate_unique_names(&scripts).is_ok());
    }

    #[test]
    fn unique_names_rejects_duplicates() {
        let scripts = vec![
            ScriptDefinition::new("a", "SELECT 1", ScriptKind::Query).unwrap(),
            ScriptDefinition::new("a", "SELECT 2", ScriptKind::Command).unwrap(),
        ];
        assert!(validate_unique_names(&scripts).is_err());
    }
}
