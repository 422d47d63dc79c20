//! Script file loading.
//!
//! Parses `scripts.yml` into an ordered, validated list of
//! [`ScriptDefinition`]s. Mapping order in the file is the report order.
//!
//! ```yaml
//! scripts:
//!   "Connection check":
//!     sql: |
//!       SELECT 1 as VALUE
//!     type: query
//!   "Refresh stats":
//!     name: "Refresh statistics"
//!     sql: ANALYZE;
//!     type: command
//!     timeout: 30
//! ```

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::CoreError;
use crate::script::{validate_unique_names, ScriptDefinition, ScriptKind};

/// Default location of the script file, relative to the working directory.
pub const DEFAULT_SCRIPT_FILE_PATH: &str = "./config/scripts.yml";

/// Top-level document shape.
#[derive(Debug, Deserialize)]
struct ScriptFile {
    scripts: Option<IndexMap<String, ScriptEntry>>,
}

/// One entry under `scripts:` as written in the file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptEntry {
    /// Display name; defaults to the mapping key.
    name: Option<String>,
    sql: String,
    #[serde(rename = "type")]
    kind: String,
    /// Timeout in seconds.
    timeout: Option<u64>,
}

/// Read and parse the script file at `path`.
pub fn load_scripts(path: impl AsRef<Path>) -> Result<Vec<ScriptDefinition>, CoreError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_scripts(&contents)
}

/// Parse script definitions from YAML text.
///
/// Fails on the first invalid entry; nothing is executed from a file that
/// does not validate completely.
pub fn parse_scripts(yaml: &str) -> Result<Vec<ScriptDefinition>, CoreError> {
    if yaml.trim().is_empty() {
        return Err(CoreError::config("Script file is empty"));
    }

    let file: ScriptFile = serde_yaml::from_str(yaml)
        .map_err(|e| CoreError::config(format!("Invalid script file: {e}")))?;

    let entries = file
        .scripts
        .ok_or_else(|| CoreError::config("Script file must contain a top-level 'scripts' key"))?;

    if entries.is_empty() {
        return Err(CoreError::config("Script file defines no scripts"));
    }

    let mut scripts = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        let name = entry.name.unwrap_or(key);
        let kind: ScriptKind = entry
            .kind
            .parse()
            .map_err(|e| CoreError::config(format!("Script \"{name}\": {e}")))?;

        let mut script = ScriptDefinition::new(name, entry.sql, kind)?;
        if let Some(secs) = entry.timeout {
            script = script.with_timeout(Duration::from_secs(secs))?;
        }
        scripts.push(script);
    }

    validate_unique_names(&scripts)?;
    Ok(scripts)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;

    use super::*;

    const SAMPLE: &str = r#"
scripts:
  "Connection check":
    sql: |
      SELECT 1
      as VALUE
    name: "Connection check"
    type: query

  "Refresh stats":
    name: "Refresh statistics"
    sql: ANALYZE;
    type: command
    timeout: 30

  "Legacy":
    sql: SELECT now()
    type: select
"#;

    #[test]
    fn parses_in_file_order() {
        let scripts = parse_scripts(SAMPLE).unwrap();
        let names: Vec<&str> = scripts.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["Connection check", "Refresh statistics", "Legacy"]);
    }

    #[test]
    fn parses_kind_sql_and_timeout() {
        let scripts = parse_scripts(SAMPLE).unwrap();
        assert_eq!(scripts[0].kind(), ScriptKind::Query);
        assert_eq!(scripts[0].sql(), "SELECT 1\nas VALUE\n");
        assert_eq!(scripts[1].kind(), ScriptKind::Command);
        assert_eq!(scripts[1].timeout(), Some(Duration::from_secs(30)));
        assert_eq!(scripts[2].kind(), ScriptKind::Query);
    }

    #[test]
    fn missing_scripts_key_rejected() {
        let err = parse_scripts("queries:\n  a:\n    sql: SELECT 1\n    type: query\n").unwrap_err();
        assert_matches!(err, CoreError::Configuration(msg) if msg.contains("'scripts'"));
    }

    #[test]
    fn empty_document_rejected() {
        assert!(parse_scripts("   \n").is_err());
        assert!(parse_scripts("scripts: {}\n").is_err());
    }

    #[test]
    fn unknown_kind_rejected_at_load_time() {
        let yaml = "scripts:\n  a:\n    sql: SELECT 1\n    type: procedure\n";
        let err = parse_scripts(yaml).unwrap_err();
        assert_matches!(err, CoreError::Configuration(msg) if msg.contains("procedure"));
    }

    #[test]
    fn missing_kind_rejected() {
        let yaml = "scripts:\n  a:\n    sql: SELECT 1\n";
        assert!(parse_scripts(yaml).is_err());
    }

    #[test]
    fn unknown_field_rejected() {
        let yaml = "scripts:\n  a:\n    sql: SELECT $1\n    type: query\n    params: [true]\n";
        assert!(parse_scripts(yaml).is_err());
    }

    #[test]
    fn duplicate_display_names_rejected() {
        let yaml = r#"
scripts:
  first:
    name: same
    sql: SELECT 1
    type: query
  second:
    name: same
    sql: SELECT 2
    type: query
"#;
        let err = parse_scripts(yaml).unwrap_err();
        assert_matches!(err, CoreError::Configuration(msg) if msg.contains("Duplicate"));
    }

    #[test]
    fn blank_sql_rejected() {
        let yaml = "scripts:\n  a:\n    sql: \"  \"\n    type: command\n";
        assert!(parse_scripts(yaml).is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let yaml = "scripts:\n  a:\n    sql: SELECT 1\n    type: command\n    timeout: 0\n";
        assert!(parse_scripts(yaml).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let scripts = load_scripts(file.path()).unwrap();
        assert_eq!(scripts.len(), 3);
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = load_scripts("/nonexistent/scripts.yml").unwrap_err();
        assert_matches!(err, CoreError::Io { path, .. } if path == "/nonexistent/scripts.yml");
    }
}
