//! Domain identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier of one submitted task instance.
///
/// ULID-based: sortable by submission time and generated on any node without
/// coordination, which matters because every node in the cluster may submit.
/// The string form travels in the `taskId` message header, so it must
/// round-trip through [`fmt::Display`] and [`FromStr`].
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Ulid);

impl TaskId {
    /// Generate a fresh identifier. Assigned exactly once, at submission time.
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid task id `{0}`")]
pub struct TaskIdParseError(String);

impl FromStr for TaskId {
    type Err = TaskIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|_| TaskIdParseError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_unique() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn task_id_roundtrips_through_header_string() {
        let id = TaskId::generate();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn garbage_header_value_is_rejected() {
        let err = "not-a-ulid!".parse::<TaskId>().unwrap_err();
        assert!(err.to_string().contains("not-a-ulid!"));
    }

    #[test]
    fn task_ids_sort_by_generation_time() {
        let a = TaskId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = TaskId::generate();
        assert!(a < b);
    }
}
