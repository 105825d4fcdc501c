//! Versioned task serialization.
//!
//! On the wire a task is a JSON envelope `{"type": <tag>, "payload": <dto>}`.
//! The tag selects the registered codec; the payload shape is private to each
//! variant's DTO. Decoding an unknown tag is always an error, never a
//! best-effort fallback.

pub mod registry;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use registry::{RegistryError, TaskRegistry};

use crate::domain::{Task, TaskType};

#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    #[error("no codec registered for task type `{0}`")]
    UnknownType(TaskType),

    /// The task's tag resolved to a codec for a different concrete type.
    /// Indicates two variants sharing a tag, which registration should have
    /// prevented.
    #[error("task type `{0}` does not match its registered codec")]
    TypeMismatch(TaskType),

    #[error("malformed task payload: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("malformed task envelope: {0}")]
    Envelope(#[source] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    task_type: TaskType,
    payload: serde_json::Value,
}

/// Turns task instances into tagged byte payloads and back, via the registry.
#[derive(Clone)]
pub struct TaskSerializer {
    registry: Arc<TaskRegistry>,
}

impl TaskSerializer {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    pub fn serialize(&self, task: &dyn Task) -> Result<Vec<u8>, SerializerError> {
        let task_type = task.task_type();
        let codec = self
            .registry
            .get(&task_type)
            .ok_or_else(|| SerializerError::UnknownType(task_type.clone()))?;
        let envelope = WireEnvelope {
            payload: codec.encode(task)?,
            task_type,
        };
        serde_json::to_vec(&envelope).map_err(SerializerError::Envelope)
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<Arc<dyn Task>, SerializerError> {
        let envelope: WireEnvelope =
            serde_json::from_slice(bytes).map_err(SerializerError::Envelope)?;
        let codec = self
            .registry
            .get(&envelope.task_type)
            .ok_or(SerializerError::UnknownType(envelope.task_type))?;
        codec.decode(envelope.payload)
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use async_trait::async_trait;

    use super::*;
    use crate::domain::{TaskError, TaskResult};

    #[derive(Debug, PartialEq)]
    struct NoopTask {
        label: String,
    }

    #[async_trait]
    impl Task for NoopTask {
        async fn run(&self) -> Result<TaskResult, TaskError> {
            Ok(TaskResult::Completed)
        }

        fn task_type(&self) -> TaskType {
            TaskType::new("noop")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct NoopDto {
        label: String,
    }

    fn registry_with_noop() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .register::<NoopTask, NoopDto>(
                TaskType::new("noop"),
                |task| NoopDto {
                    label: task.label.clone(),
                },
                |dto| NoopTask { label: dto.label },
            )
            .unwrap();
        registry
    }

    #[test]
    fn roundtrip_reconstructs_construction_parameters() {
        let serializer = TaskSerializer::new(Arc::new(registry_with_noop()));
        let task = NoopTask {
            label: "hello".to_string(),
        };

        let bytes = serializer.serialize(&task).unwrap();
        let back = serializer.deserialize(&bytes).unwrap();

        let back = back.as_any().downcast_ref::<NoopTask>().unwrap();
        assert_eq!(back, &task);
    }

    #[test]
    fn envelope_carries_the_type_tag() {
        let serializer = TaskSerializer::new(Arc::new(registry_with_noop()));
        let bytes = serializer
            .serialize(&NoopTask {
                label: "x".to_string(),
            })
            .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "noop");
        assert_eq!(value["payload"]["label"], "x");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry_with_noop();
        let err = registry
            .register::<NoopTask, NoopDto>(
                TaskType::new("noop"),
                |task| NoopDto {
                    label: task.label.clone(),
                },
                |dto| NoopTask { label: dto.label },
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateType(_)));
        // The original codec is untouched.
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_type_is_an_error_not_a_fallback() {
        let serializer = TaskSerializer::new(Arc::new(registry_with_noop()));
        let bytes = br#"{"type":"unregistered","payload":{}}"#;
        let err = serializer.deserialize(bytes).err().unwrap();
        assert!(matches!(err, SerializerError::UnknownType(_)));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let serializer = TaskSerializer::new(Arc::new(registry_with_noop()));

        let err = serializer.deserialize(b"not json at all").err().unwrap();
        assert!(matches!(err, SerializerError::Envelope(_)));

        let err = serializer
            .deserialize(br#"{"type":"noop","payload":{"label":42}}"#)
            .err()
            .unwrap();
        assert!(matches!(err, SerializerError::Malformed(_)));
    }

    #[test]
    fn serializing_an_unregistered_task_fails() {
        let serializer = TaskSerializer::new(Arc::new(TaskRegistry::new()));
        let err = serializer
            .serialize(&NoopTask {
                label: "x".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, SerializerError::UnknownType(_)));
    }
}
