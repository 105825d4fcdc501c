//! Codec registry: task type tag -> encode/decode logic.
//!
//! Built during initialization (mutable), shared immutably at runtime behind
//! an `Arc`. Explicit registration only; duplicate tags fail fast, unknown
//! tags always error at decode time.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::SerializerError;
use crate::domain::{Task, TaskType};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a codec for task type `{0}` is already registered")]
    DuplicateType(TaskType),
}

/// Object-safe codec for one task variant.
///
/// `TypedCodec<T, D>` erases the concrete task type `T` and its wire DTO `D`
/// behind this trait so the registry can hold heterogeneous variants in one
/// map.
pub(crate) trait DynTaskCodec: Send + Sync {
    fn encode(&self, task: &dyn Task) -> Result<serde_json::Value, SerializerError>;
    fn decode(&self, payload: serde_json::Value) -> Result<Arc<dyn Task>, SerializerError>;
}

struct TypedCodec<T, D, ToDto, FromDto> {
    task_type: TaskType,
    to_dto: ToDto,
    from_dto: FromDto,
    _marker: PhantomData<fn() -> (T, D)>,
}

impl<T, D, ToDto, FromDto> DynTaskCodec for TypedCodec<T, D, ToDto, FromDto>
where
    T: Task,
    D: Serialize + DeserializeOwned,
    ToDto: Fn(&T) -> D + Send + Sync,
    FromDto: Fn(D) -> T + Send + Sync,
{
    fn encode(&self, task: &dyn Task) -> Result<serde_json::Value, SerializerError> {
        let concrete = task
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| SerializerError::TypeMismatch(self.task_type.clone()))?;
        let dto = (self.to_dto)(concrete);
        serde_json::to_value(dto).map_err(SerializerError::Malformed)
    }

    fn decode(&self, payload: serde_json::Value) -> Result<Arc<dyn Task>, SerializerError> {
        let dto: D = serde_json::from_value(payload).map_err(SerializerError::Malformed)?;
        Ok(Arc::new((self.from_dto)(dto)))
    }
}

/// Registry of task codecs (task type -> codec).
///
/// The decode side mirrors the factory pattern: `from_dto` closes over
/// whatever collaborators the reconstructed task needs (index performer, mail
/// sender, ...), so deserialized tasks come out fully wired.
#[derive(Default)]
pub struct TaskRegistry {
    codecs: HashMap<TaskType, Arc<dyn DynTaskCodec>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register the codec for one task variant.
    ///
    /// No silent overwrite: a second registration under the same tag is a
    /// [`RegistryError::DuplicateType`].
    pub fn register<T, D>(
        &mut self,
        task_type: TaskType,
        to_dto: impl Fn(&T) -> D + Send + Sync + 'static,
        from_dto: impl Fn(D) -> T + Send + Sync + 'static,
    ) -> Result<(), RegistryError>
    where
        T: Task,
        D: Serialize + DeserializeOwned + 'static,
    {
        if self.codecs.contains_key(&task_type) {
            return Err(RegistryError::DuplicateType(task_type));
        }
        let codec = TypedCodec {
            task_type: task_type.clone(),
            to_dto,
            from_dto,
            _marker: PhantomData,
        };
        self.codecs.insert(task_type, Arc::new(codec));
        Ok(())
    }

    pub(crate) fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn DynTaskCodec>> {
        self.codecs.get(task_type)
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        self.codecs.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}
