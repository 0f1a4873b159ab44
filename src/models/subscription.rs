use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// An Azure subscription. Identity is the cloud-assigned ID; the name drives
/// filtering, directory layout and repository naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub name: String,
}

impl Subscription {
    /// Build a subscription, falling back to the ID when the name is blank.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into().trim().to_string();
        let name = name.into().trim().to_string();
        let name = if name.is_empty() { id.clone() } else { name };
        Self { id, name }
    }

    /// True when `identifier` equals either the ID or the name exactly.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.id == identifier || self.name == identifier
    }

    /// Directory name used for this subscription under the output base dir.
    pub fn directory_name(&self) -> String {
        sanitize_name(&self.name)
    }
}

/// A resource group as reported by `az group list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    #[serde(default)]
    pub name: String,
}

fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("Invalid sanitize regex"))
}

/// Make a name safe for use as a directory: every character outside
/// `[a-zA-Z0-9_-]` becomes `_`, and the result is lowercased.
pub fn sanitize_name(name: &str) -> String {
    unsafe_chars().replace_all(name, "_").to_lowercase()
}
