use std::sync::Arc;

use glam::Vec3;
use parking_lot::RwLock;

use crate::binding::{is_uniform_type, SceneBackend};
use crate::property::PropertyValue;
use crate::scene::{Frustum, Scene, SceneObject, Viewport};

/// Thread-safe container mirroring the mutable state of the scene graph.
#[derive(Debug, Default)]
pub struct DataModel {
    objects: Arc<RwLock<Vec<SceneObject>>>,
}

impl Clone for DataModel {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
        }
    }
}

impl DataModel {
    /// Creates an empty data model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a data model from an initial set of objects.
    pub fn from_objects(objects: Vec<SceneObject>) -> Self {
        Self {
            objects: Arc::new(RwLock::new(objects)),
        }
    }

    pub fn from_scene(scene: &Scene) -> Self {
        Self::from_objects(scene.objects.clone())
    }

    /// Replaces the stored objects with a new snapshot.
    pub fn replace_objects(&self, objects: Vec<SceneObject>) {
        *self.objects.write() = objects;
    }

    /// Returns a snapshot of all stored objects.
    pub fn all_objects(&self) -> Vec<SceneObject> {
        self.objects.read().clone()
    }

    /// Returns a clone of the requested object.
    pub fn get(&self, name: &str) -> Option<SceneObject> {
        self.objects
            .read()
            .iter()
            .find(|object| object.name == name)
            .cloned()
    }

    /// Applies a mutation to the requested object.
    pub fn update<F, R>(&self, name: &str, mut updater: F) -> Option<R>
    where
        F: FnMut(&mut SceneObject) -> R,
    {
        let mut guard = self.objects.write();
        let object = guard.iter_mut().find(|object| object.name == name)?;
        Some(updater(object))
    }
}

impl SceneBackend for DataModel {
    fn object(&self, name: &str) -> Option<SceneObject> {
        self.get(name)
    }

    fn set_visibility(&self, name: &str, visible: bool) -> bool {
        self.update(name, |obj| obj.visible = visible).is_some()
    }

    fn set_translation(&self, name: &str, translation: Vec3) -> bool {
        self.update(name, |obj| obj.position = translation).is_some()
    }

    fn set_rotation(&self, name: &str, rotation: Vec3) -> bool {
        self.update(name, |obj| obj.rotation = rotation).is_some()
    }

    fn set_scale(&self, name: &str, scale: Vec3) -> bool {
        self.update(name, |obj| obj.scale = scale).is_some()
    }

    fn set_uniform(&self, name: &str, uniform: &str, value: &PropertyValue) -> bool {
        if !is_uniform_type(value.property_type()) {
            return false;
        }
        self.update(name, |obj| {
            match obj.uniforms.iter_mut().find(|candidate| candidate.name == uniform) {
                Some(slot) if slot.value.property_type() == value.property_type() => {
                    slot.value = value.clone();
                    true
                }
                _ => false,
            }
        })
        .unwrap_or(false)
    }

    fn set_viewport(&self, name: &str, viewport: Viewport) -> bool {
        self.update(name, |obj| obj.viewport = viewport).is_some()
    }

    fn set_frustum(&self, name: &str, frustum: Frustum) -> bool {
        self.update(name, |obj| obj.frustum = frustum).is_some()
    }
}
