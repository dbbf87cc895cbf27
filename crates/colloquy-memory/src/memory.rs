use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use colloquy_core::error::{ColloquyError, Result};
use colloquy_core::traits::CheckpointStore;
use colloquy_core::types::{Checkpoint, ThreadId};

/// Process-local checkpoint store.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> ColloquyError {
    ColloquyError::Checkpoint("checkpoint map lock poisoned".into())
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.checkpoints
                .lock()
                .map_err(poisoned)?
                .insert(checkpoint.thread_id.0.clone(), checkpoint.clone());
            Ok(())
        })
    }

    fn load<'a>(&'a self, thread_id: &'a ThreadId) -> BoxFuture<'a, Result<Option<Checkpoint>>> {
        Box::pin(async move {
            Ok(self
                .checkpoints
                .lock()
                .map_err(poisoned)?
                .get(thread_id.as_str())
                .cloned())
        })
    }

    fn delete<'a>(&'a self, thread_id: &'a ThreadId) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            let removed = self
                .checkpoints
                .lock()
                .map_err(poisoned)?
                .remove(thread_id.as_str());
            Ok(usize::from(removed.is_some()))
        })
    }
}
