use std::path::{Path, PathBuf};

use chrono::Duration;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::error::{RelicError, Result};
use crate::model::PathMapping;

/// Pattern/replacement pair as written in config files and CLI flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub pattern: String,
    pub replacement: String,
}

/// Everything a migration run needs, produced by the CLI layer.
///
/// Loadable from a YAML file; individual fields can be overridden by flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Snapshot file (or source database root) to read history from.
    pub source: PathBuf,
    /// Project path inside the source hierarchy, e.g. `$/project`.
    pub project: String,
    /// Directory the git repository is created in.
    pub output: PathBuf,
    /// Wildcard patterns; matching items contribute no revisions at all.
    pub exclude: Vec<String>,
    pub path_mapping: Option<MappingRule>,
    /// When set, author emails become `username@domain`.
    pub email_domain: Option<String>,
    /// Commit message used when a changeset has no comment.
    pub default_comment: Option<String>,
    /// Source character encoding label, e.g. `utf-8` or `windows-1252`.
    pub encoding: String,
    /// Transcode commit messages to UTF-8 instead of writing them in the
    /// source encoding as-is.
    pub transcode_comments: bool,
    /// Log and continue on individual export tree-operation failures.
    pub ignore_errors: bool,
    /// Create annotated tag objects instead of lightweight tags.
    pub annotate_tags: bool,
    /// Abort analysis on the first malformed item instead of skipping it.
    pub fail_fast: bool,
    /// Max gap between same-author revisions merged unconditionally.
    pub any_comment_secs: u64,
    /// Max gap merged when the comment matches exactly (non-empty).
    pub same_comment_secs: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            project: "$/".into(),
            output: PathBuf::new(),
            exclude: Vec::new(),
            path_mapping: None,
            email_domain: None,
            default_comment: None,
            encoding: "utf-8".into(),
            transcode_comments: false,
            ignore_errors: false,
            annotate_tags: false,
            fail_fast: false,
            any_comment_secs: 30,
            same_comment_secs: 600,
        }
    }
}

impl MigrationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    pub fn any_comment_threshold(&self) -> Duration {
        Duration::seconds(self.any_comment_secs as i64)
    }

    pub fn same_comment_threshold(&self) -> Duration {
        Duration::seconds(self.same_comment_secs as i64)
    }

    /// Compile the configured mapping rule, if any.
    pub fn compiled_mapping(&self) -> Result<Option<PathMapping>> {
        match &self.path_mapping {
            Some(rule) => Ok(Some(PathMapping::new(&rule.pattern, &rule.replacement)?)),
            None => Ok(None),
        }
    }

    /// Resolve the configured encoding label against the WHATWG registry.
    pub fn resolved_encoding(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.encoding.as_bytes())
            .ok_or_else(|| RelicError::UnknownEncoding(self.encoding.clone()))
    }

    /// Check everything that can be checked without touching the source:
    /// paths present, mapping compiles, encoding known. Errors here are
    /// configuration errors and never reach the background worker.
    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(RelicError::InvalidConfig("source path is empty".into()));
        }
        if self.output.as_os_str().is_empty() {
            return Err(RelicError::InvalidConfig("output path is empty".into()));
        }
        if self.project.is_empty() {
            return Err(RelicError::InvalidConfig("project path is empty".into()));
        }
        self.compiled_mapping()?;
        self.resolved_encoding()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MigrationConfig {
        MigrationConfig {
            source: "snapshot.json".into(),
            project: "$/proj".into(),
            output: "out".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_use_documented_thresholds() {
        let config = MigrationConfig::default();
        assert_eq!(config.any_comment_threshold(), Duration::seconds(30));
        assert_eq!(config.same_comment_threshold(), Duration::seconds(600));
        assert_eq!(config.encoding, "utf-8");
    }

    #[test]
    fn validate_accepts_complete_config() {
        valid().validate().unwrap();
    }

    #[test]
    fn validate_rejects_missing_paths() {
        let config = MigrationConfig::default();
        assert!(matches!(
            config.validate().unwrap_err(),
            RelicError::InvalidConfig(_)
        ));
    }

    #[test]
    fn validate_rejects_unknown_encoding() {
        let mut config = valid();
        config.encoding = "no-such-charset".into();
        assert!(matches!(
            config.validate().unwrap_err(),
            RelicError::UnknownEncoding(_)
        ));
    }

    #[test]
    fn validate_rejects_bad_mapping() {
        let mut config = valid();
        config.path_mapping = Some(MappingRule {
            pattern: "(".into(),
            replacement: "x".into(),
        });
        assert!(matches!(
            config.validate().unwrap_err(),
            RelicError::InvalidMapping(_, _)
        ));
    }

    #[test]
    fn yaml_round_trip_preserves_fields() {
        let mut config = valid();
        config.exclude = vec!["*.tmp".into()];
        config.email_domain = Some("example.com".into());
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: MigrationConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, parsed);
    }
}
