use std::fmt;

use serde::{Deserialize, Serialize};

/// String tag identifying a serializable task variant.
///
/// Tags are globally unique across registered variants and immutable once
/// registered; they drive serialization dispatch and show up in operational
/// reporting, so keep them short and stable (e.g. `"reindex"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
