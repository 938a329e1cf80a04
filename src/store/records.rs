//! Typed records for the store tables.

use serde::{Deserialize, Serialize};

/// Row of `approved_domains`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedDomain {
    pub domain: String,
}

/// Row of `contents`: allowed MIME top-level types for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRule {
    pub domain_name: String,
    /// Insertion ordered, duplicate free.
    #[serde(rename = "content")]
    pub content_types: Vec<String>,
}

impl ContentRule {
    pub fn allows(&self, mime_type: &str) -> bool {
        self.content_types.iter().any(|t| t == mime_type)
    }
}

/// Row of `plugins`: module identifiers per phase, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOrdering {
    #[serde(default)]
    pub request_modules: Vec<String>,
    #[serde(default)]
    pub response_modules: Vec<String>,
}

/// Row of `users`. The password is a hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "user-name")]
    pub username: String,
    pub password: String,
}
