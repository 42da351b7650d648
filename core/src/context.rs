//! Per-server call context
//!
//! Owns the state a handler may touch while servicing a call: the object
//! store and the host's current scene. One context exists per server process;
//! it is created by the host integration layer and shared with the dispatcher.

use std::any::Any;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};

use crate::objects::{Instance, ObjectStore};
use crate::scene::GameScene;
use crate::value::Value;

pub struct CallContext {
    objects: ObjectStore,
    scene: Mutex<GameScene>,
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            objects: ObjectStore::new(),
            scene: Mutex::new(GameScene::default()),
        }
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// The host's current scene, read at dispatch time for the mask check.
    pub fn scene(&self) -> GameScene {
        *self.scene.lock().unwrap()
    }

    /// Called by the host whenever its mode changes.
    pub fn set_scene(&self, scene: GameScene) {
        *self.scene.lock().unwrap() = scene;
    }

    /// Registers an object in the store and returns the handle value that
    /// represents it on the wire.
    pub fn export<T: Any + Send + Sync>(&self, obj: Arc<T>) -> Value {
        Value::Object(self.objects.add_instance(Some(obj)))
    }

    /// Resolves an object-handle value back to a typed instance. Handle 0
    /// resolves to `None`.
    pub fn instance<T: Any + Send + Sync>(&self, value: &Value) -> Result<Option<Arc<T>>> {
        let Value::Object(handle) = value else {
            bail!("expected an object handle, got {}", value.type_name());
        };
        match self.objects.get_instance(*handle)? {
            None => Ok(None),
            Some(obj) => match obj.downcast::<T>() {
                Ok(typed) => Ok(Some(typed)),
                Err(_) => bail!("object handle {} has an unexpected type", handle),
            },
        }
    }

    /// Downcasts an already-resolved instance.
    pub fn downcast<T: Any + Send + Sync>(&self, obj: Instance) -> Result<Arc<T>> {
        obj.downcast::<T>()
            .map_err(|_| anyhow::anyhow!("object instance has an unexpected type"))
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
