use crate::apply::ApplyOptions;
use crate::extract::{TagSet, DEFAULT_NAMESPACE};
use serde::Deserialize;
use std::fmt;

/// Contents of an `aigen.toml` file.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PatcherConfig {
    #[serde(default)]
    pub tags: TagSettings,
    #[serde(default)]
    pub apply: ApplySettings,
}

impl PatcherConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        let mut issues = Vec::new();

        let namespace = self.tags.namespace.as_str();
        if namespace.trim().is_empty() {
            issues.push(ConfigIssue::MissingField {
                field: "tags.namespace",
            });
        } else if namespace
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '/' | '"'))
        {
            issues.push(ConfigIssue::InvalidValue {
                field: "tags.namespace",
                message: format!("'{namespace}' is not usable inside a tag name"),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(InvalidConfig { issues })
        }
    }

    pub fn tag_set(&self) -> TagSet {
        TagSet::with_namespace(&self.tags.namespace)
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            backup: self.apply.backup,
            dry_run: self.apply.dry_run,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TagSettings {
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for TagSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApplySettings {
    #[serde(default = "default_true")]
    pub backup: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            backup: true,
            dry_run: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct InvalidConfig {
    pub issues: Vec<ConfigIssue>,
}

impl fmt::Display for InvalidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for InvalidConfig {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    MissingField {
        field: &'static str,
    },
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::MissingField { field } => {
                write!(f, "config missing required field '{field}'")
            }
            ConfigIssue::InvalidValue { field, message } => {
                write!(f, "config field '{field}' is invalid: {message}")
            }
        }
    }
}
