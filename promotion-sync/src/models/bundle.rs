//! Release Bundle identification types.

use serde::{Deserialize, Serialize};

/// Project key the Lifecycle API assumes when none is given.
pub const DEFAULT_PROJECT_KEY: &str = "default";

/// A single Release Bundle version, the unit every sync operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleVersionRef {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
}

impl BundleVersionRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            project_key: None,
        }
    }

    pub fn with_project(mut self, project_key: impl Into<String>) -> Self {
        self.project_key = Some(project_key.into());
        self
    }

    /// Project key sent on the wire, falling back to `default`.
    pub fn project_or_default(&self) -> &str {
        self.project_key.as_deref().unwrap_or(DEFAULT_PROJECT_KEY)
    }
}

impl std::fmt::Display for BundleVersionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        if let Some(project) = &self.project_key {
            write!(f, " (project {})", project)?;
        }
        Ok(())
    }
}

/// A Release Bundle name as reported by bundle discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSummary {
    pub name: String,
    pub project_key: Option<String>,
    pub repository_key: Option<String>,
}

impl BundleSummary {
    pub fn version(&self, version: impl Into<String>) -> BundleVersionRef {
        BundleVersionRef {
            name: self.name.clone(),
            version: version.into(),
            project_key: self.project_key.clone(),
        }
    }

    /// Effective project key, `default` when the server reported none.
    pub fn project_or_default(&self) -> &str {
        self.project_key.as_deref().unwrap_or(DEFAULT_PROJECT_KEY)
    }
}
