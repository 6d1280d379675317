//! Binding nodes: the boundary between the logic graph and the scene.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::property::{Property, PropertyType, PropertyValue};
use crate::scene::{Frustum, SceneObject, Viewport};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindingError {
    #[error("scene object '{0}' does not exist")]
    UnknownObject(String),
    #[error("scene object '{0}' has no uniform '{1}'")]
    UnknownUniform(String, String),
    #[error("appearance bindings need a scene to read uniforms from")]
    NoScene,
    #[error("binding input '{0}' has an unexpected shape")]
    MalformedInput(String),
}

/// Setter surface of the external scene. Every setter returns `false` when
/// the target no longer exists.
pub trait SceneBackend: Send + Sync {
    /// Snapshot of an object's current state.
    fn object(&self, name: &str) -> Option<SceneObject>;
    fn set_visibility(&self, name: &str, visible: bool) -> bool;
    fn set_translation(&self, name: &str, translation: Vec3) -> bool;
    fn set_rotation(&self, name: &str, rotation: Vec3) -> bool;
    fn set_scale(&self, name: &str, scale: Vec3) -> bool;
    fn set_uniform(&self, name: &str, uniform: &str, value: &PropertyValue) -> bool;
    fn set_viewport(&self, name: &str, viewport: Viewport) -> bool;
    fn set_frustum(&self, name: &str, frustum: Frustum) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingKind {
    Node,
    Appearance,
    Camera,
}

impl BindingKind {
    pub fn type_name(self) -> &'static str {
        match self {
            BindingKind::Node => "NodeBinding",
            BindingKind::Appearance => "AppearanceBinding",
            BindingKind::Camera => "CameraBinding",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindingNode {
    kind: BindingKind,
    target: String,
}

impl BindingNode {
    pub fn new(kind: BindingKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    /// Name of the scene object this binding drives.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Input tree initialised from `object`, or from scene defaults when no
    /// scene is attached.
    pub(crate) fn interface(&self, object: Option<&SceneObject>) -> Result<Property, BindingError> {
        let defaults = SceneObject::default();
        let source = object.unwrap_or(&defaults);
        let fields = match self.kind {
            BindingKind::Node => vec![
                Property::with_value("visibility", source.visible),
                Property::with_value("rotation", source.rotation),
                Property::with_value("translation", source.position),
                Property::with_value("scale", source.scale),
            ],
            BindingKind::Appearance => {
                let object = object.ok_or(BindingError::NoScene)?;
                object
                    .uniforms
                    .iter()
                    .map(|uniform| Property::with_value(uniform.name.clone(), uniform.value.clone()))
                    .collect()
            }
            BindingKind::Camera => {
                let viewport = source.viewport;
                let frustum = source.frustum;
                vec![
                    Property::new_struct(
                        "viewport",
                        vec![
                            Property::with_value("offsetX", viewport.offset_x),
                            Property::with_value("offsetY", viewport.offset_y),
                            Property::with_value("width", viewport.width),
                            Property::with_value("height", viewport.height),
                        ],
                    ),
                    Property::new_struct(
                        "frustum",
                        vec![
                            Property::with_value("nearPlane", frustum.near_plane),
                            Property::with_value("farPlane", frustum.far_plane),
                            Property::with_value("fieldOfView", frustum.field_of_view),
                            Property::with_value("aspectRatio", frustum.aspect_ratio),
                        ],
                    ),
                ]
            }
        };
        Ok(Property::new_struct("IN", fields))
    }

    /// Pushes every dirty input to the scene and returns how many setters
    /// were called.
    pub(crate) fn push(
        &self,
        inputs: &Property,
        scene: &dyn SceneBackend,
    ) -> Result<usize, BindingError> {
        let mut pushed = 0;
        for field in inputs.children().iter().filter(|field| field.is_dirty()) {
            let accepted = match (self.kind, field.name()) {
                (BindingKind::Node, "visibility") => {
                    scene.set_visibility(&self.target, leaf::<bool>(field)?)
                }
                (BindingKind::Node, "rotation") => {
                    scene.set_rotation(&self.target, leaf::<Vec3>(field)?)
                }
                (BindingKind::Node, "translation") => {
                    scene.set_translation(&self.target, leaf::<Vec3>(field)?)
                }
                (BindingKind::Node, "scale") => scene.set_scale(&self.target, leaf::<Vec3>(field)?),
                (BindingKind::Appearance, uniform) => {
                    let value = field
                        .value()
                        .ok_or_else(|| BindingError::MalformedInput(uniform.to_string()))?;
                    if !scene.set_uniform(&self.target, uniform, value) {
                        return Err(match scene.object(&self.target) {
                            Some(_) => BindingError::UnknownUniform(
                                self.target.clone(),
                                uniform.to_string(),
                            ),
                            None => BindingError::UnknownObject(self.target.clone()),
                        });
                    }
                    true
                }
                (BindingKind::Camera, "viewport") => {
                    scene.set_viewport(&self.target, viewport_from(field)?)
                }
                (BindingKind::Camera, "frustum") => {
                    scene.set_frustum(&self.target, frustum_from(field)?)
                }
                (_, other) => return Err(BindingError::MalformedInput(other.to_string())),
            };
            if !accepted {
                return Err(BindingError::UnknownObject(self.target.clone()));
            }
            pushed += 1;
        }
        if pushed > 0 {
            log::debug!("{} '{}' pushed {pushed} value(s)", self.kind.type_name(), self.target);
        }
        Ok(pushed)
    }
}

fn leaf<T: crate::property::FromPropertyValue>(property: &Property) -> Result<T, BindingError> {
    property
        .get::<T>()
        .ok_or_else(|| BindingError::MalformedInput(property.name().to_string()))
}

fn field<T: crate::property::FromPropertyValue>(
    group: &Property,
    name: &str,
) -> Result<T, BindingError> {
    group
        .child(name)
        .and_then(Property::get::<T>)
        .ok_or_else(|| BindingError::MalformedInput(format!("{}.{name}", group.name())))
}

fn viewport_from(group: &Property) -> Result<Viewport, BindingError> {
    Ok(Viewport {
        offset_x: field(group, "offsetX")?,
        offset_y: field(group, "offsetY")?,
        width: field(group, "width")?,
        height: field(group, "height")?,
    })
}

fn frustum_from(group: &Property) -> Result<Frustum, BindingError> {
    Ok(Frustum {
        near_plane: field(group, "nearPlane")?,
        far_plane: field(group, "farPlane")?,
        field_of_view: field(group, "fieldOfView")?,
        aspect_ratio: field(group, "aspectRatio")?,
    })
}

/// Types accepted by appearance uniforms.
pub fn is_uniform_type(ty: PropertyType) -> bool {
    ty.is_primitive() && ty != PropertyType::String
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::DataModel;
    use crate::scene::Uniform;

    fn scene() -> DataModel {
        DataModel::from_objects(vec![
            SceneObject {
                name: "Cube".into(),
                object_type: "mesh".into(),
                uniforms: vec![Uniform {
                    name: "u_alpha".into(),
                    value: PropertyValue::Float(1.0),
                }],
                ..SceneObject::default()
            },
            SceneObject {
                name: "Camera".into(),
                object_type: "camera".into(),
                ..SceneObject::default()
            },
        ])
    }

    #[test]
    fn node_binding_pushes_only_dirty_inputs() {
        let model = scene();
        let binding = BindingNode::new(BindingKind::Node, "Cube");
        let mut inputs = binding.interface(model.get("Cube").as_ref()).unwrap();
        assert_eq!(binding.push(&inputs, &model).unwrap(), 0);

        let path = inputs.resolve_path("translation").unwrap();
        inputs.set_at(&path, Vec3::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(binding.push(&inputs, &model).unwrap(), 1);
        assert_eq!(model.get("Cube").unwrap().position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(model.get("Cube").unwrap().scale, Vec3::ONE);
    }

    #[test]
    fn appearance_binding_mirrors_uniforms() {
        let model = scene();
        let binding = BindingNode::new(BindingKind::Appearance, "Cube");
        let mut inputs = binding.interface(model.get("Cube").as_ref()).unwrap();
        assert_eq!(inputs.child_count(), 1);
        inputs.set_at(&[0], 0.25f32).unwrap();
        binding.push(&inputs, &model).unwrap();
        assert_eq!(
            model.get("Cube").unwrap().uniform("u_alpha"),
            Some(&PropertyValue::Float(0.25))
        );
        assert_eq!(binding.interface(None), Err(BindingError::NoScene));
    }

    #[test]
    fn camera_binding_pushes_whole_groups() {
        let model = scene();
        let binding = BindingNode::new(BindingKind::Camera, "Camera");
        let mut inputs = binding.interface(model.get("Camera").as_ref()).unwrap();
        let path = inputs.resolve_path("viewport.width").unwrap();
        inputs.set_at(&path, 640i32).unwrap();
        assert_eq!(binding.push(&inputs, &model).unwrap(), 1);
        let camera = model.get("Camera").unwrap();
        assert_eq!(camera.viewport.width, 640);
        assert_eq!(camera.viewport.height, 720);
    }

    #[test]
    fn push_to_missing_object_fails() {
        let model = DataModel::new();
        let binding = BindingNode::new(BindingKind::Node, "Gone");
        let mut inputs = binding.interface(None).unwrap();
        inputs.set_at(&[0], false).unwrap();
        assert_eq!(
            binding.push(&inputs, &model),
            Err(BindingError::UnknownObject("Gone".into()))
        );
    }
}
