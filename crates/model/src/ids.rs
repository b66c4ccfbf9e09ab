//! Identifier newtypes for net elements and specifications

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a condition (place) within a net
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionId(String);

impl ConditionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConditionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a task (transition) within a net
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a registered process specification
///
/// Unique within one engine's specification registry. Two versions of the
/// same process are two distinct specifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecificationId(String);

impl SpecificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpecificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpecificationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Reference to either a condition or a task, by id
///
/// Used where a net element of either kind may be named, e.g. the members of
/// a cancellation set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum NodeRef {
    Condition(ConditionId),
    Task(TaskId),
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Condition(id) => write!(f, "condition:{id}"),
            Self::Task(id) => write!(f, "task:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_roundtrip() {
        let id = ConditionId::new("c1");
        assert_eq!(id.to_string(), "c1");
        assert_eq!(id.as_str(), "c1");

        let id = TaskId::new("approve");
        assert_eq!(id.to_string(), "approve");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = TaskId::new("approve");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"approve\"");

        let parsed: TaskId = serde_json::from_str("\"approve\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_node_ref_serialization() {
        let node = NodeRef::Task(TaskId::new("t1"));
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"kind\":\"task\""));

        let parsed: NodeRef = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, node);
    }
}
