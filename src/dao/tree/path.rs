//! Slash-separated addresses into the shared tree.

use std::fmt;

use uuid::Uuid;

use crate::dao::storage::{StorageError, StorageResult};

const FORBIDDEN_KEY_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

/// Address of a node in the tree, stored as validated key segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// The root of the tree.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a `/`-separated path. Leading and trailing slashes are ignored.
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            validate_key(segment).map_err(|reason| StorageError::invalid_path(raw, reason))?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Build a path from individual keys, validating each one.
    pub fn from_keys(keys: &[&str]) -> StorageResult<Self> {
        keys.iter().try_fold(Self::root(), |path, key| path.child(key))
    }

    /// Append a single key, rejecting keys that would address a different node.
    pub fn child(&self, key: &str) -> StorageResult<Self> {
        validate_key(key)
            .map_err(|reason| StorageError::invalid_path(format!("{self}/{key}"), reason))?;
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Ok(Self { segments })
    }

    /// Concatenate an already validated relative path.
    pub fn join(&self, relative: &TreePath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        Self { segments }
    }

    /// Borrow the key segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last key of the path, `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Path of the parent node, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Whether `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments.iter().zip(&prefix.segments).all(|(a, b)| a == b)
    }

    /// Whether a write at one path can change the value observed at the other.
    pub fn overlaps(&self, other: &TreePath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Strip `prefix` from this path, returning the remaining relative path.
    pub fn strip_prefix(&self, prefix: &TreePath) -> Option<Self> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(Self {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Check that `key` can be used as a single path segment.
pub fn validate_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("empty key");
    }
    if key.chars().any(|c| FORBIDDEN_KEY_CHARS.contains(&c)) {
        return Err("key contains a forbidden character");
    }
    if key.chars().any(char::is_control) {
        return Err("key contains a control character");
    }
    Ok(())
}

/// Generate a new child key for appended records. Keys sort by creation time.
pub fn push_id() -> String {
    Uuid::now_v7().simple().to_string()
}
