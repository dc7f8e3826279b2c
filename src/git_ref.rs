//! Branch or tag reference selected when triggering a build.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitRefKind {
    Branch,
    Tag,
}

impl GitRefKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GitRefKind::Branch => "branch",
            GitRefKind::Tag => "tag",
        }
    }
}

/// Serializes as a single-key map (`{"branch": name}` or `{"tag": name}`) so it
/// can be flattened straight into the trigger body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GitReference {
    Branch(String),
    Tag(String),
}

impl Default for GitReference {
    fn default() -> Self {
        GitReference::Branch(String::new())
    }
}

impl GitReference {
    /// Returns `None` for anything other than `branch` or `tag`.
    pub fn from_kind(kind: &str, name: impl Into<String>) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "branch" => Some(GitReference::Branch(name.into())),
            "tag" => Some(GitReference::Tag(name.into())),
            _ => None,
        }
    }

    pub fn kind(&self) -> GitRefKind {
        match self {
            GitReference::Branch(_) => GitRefKind::Branch,
            GitReference::Tag(_) => GitRefKind::Tag,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            GitReference::Branch(name) | GitReference::Tag(name) => name,
        }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, GitReference::Tag(_))
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        match self {
            GitReference::Branch(_) => GitReference::Branch(name.into()),
            GitReference::Tag(_) => GitReference::Tag(name.into()),
        }
    }

    /// Same name, other kind.
    pub fn toggled_kind(&self) -> Self {
        match self {
            GitReference::Branch(name) => GitReference::Tag(name.clone()),
            GitReference::Tag(name) => GitReference::Branch(name.clone()),
        }
    }

    pub fn name_mut(&mut self) -> &mut String {
        match self {
            GitReference::Branch(name) | GitReference::Tag(name) => name,
        }
    }

    /// Exactly one of `branch` / `tag`, mapped to the name.
    pub fn submission_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert(self.kind().as_str().to_string(), self.name().to_string());
        fields
    }
}

impl fmt::Display for GitReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.name())
    }
}
