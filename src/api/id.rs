use serde::{Deserialize, Serialize};
use std::fmt;

// EXPERIMENTS

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slug(String);

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<String> for Slug {
    fn from(slug: String) -> Self {
        Slug(slug)
    }
}

impl From<&str> for Slug {
    fn from(slug: &str) -> Self {
        Slug(slug.to_owned())
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `name` with every character outside `[A-Za-z0-9_]` replaced by `_`,
/// usable as part of a warehouse table name.
pub(crate) fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

// RUNS

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        RunId(id)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        RunId(id.to_owned())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
