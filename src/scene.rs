use anyhow::{anyhow, bail, Context, Result};
use glam::Vec3;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::property::{PropertyType, PropertyValue};

/// Scene description the logic graph is bound against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
}

impl Scene {
    /// Parses the scene XML produced by the authoring tools.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml).context("invalid scene XML")?;
        let mut objects = Vec::new();

        for node in document.descendants().filter(|n| n.has_tag_name("object")) {
            let mut object = SceneObject::default();
            object.name = required_text(&node, "name")?;
            object.object_type = optional_text(&node, "type").unwrap_or_else(|| "node".to_string());
            object.visible = parse_bool(optional_text(&node, "visible"), object.visible)?;
            object.position = parse_vec3(optional_text(&node, "position"), object.position)?;
            object.rotation = parse_vec3(optional_text(&node, "rotation"), object.rotation)?;
            object.scale = parse_vec3(optional_text(&node, "scale"), object.scale)?;
            object.viewport = parse_viewport(optional_text(&node, "viewport"), object.viewport)
                .with_context(|| format!("object '{}'", object.name))?;
            object.frustum.field_of_view =
                parse_f32(optional_text(&node, "fov"), object.frustum.field_of_view)?;
            object.frustum.near_plane =
                parse_f32(optional_text(&node, "near"), object.frustum.near_plane)?;
            object.frustum.far_plane =
                parse_f32(optional_text(&node, "far"), object.frustum.far_plane)?;
            object.frustum.aspect_ratio =
                parse_f32(optional_text(&node, "aspect"), object.frustum.aspect_ratio)?;
            for uniform in node.children().filter(|child| child.has_tag_name("uniform")) {
                let uniform = parse_uniform(&uniform)
                    .with_context(|| format!("object '{}'", object.name))?;
                object.uniforms.push(uniform);
            }
            objects.push(object);
        }

        Ok(Self { objects })
    }

    pub fn object(&self, name: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|object| object.name == name)
    }
}

/// Scene object as described by the authoring tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Vec3,
    #[serde(default = "default_scale")]
    pub scale: Vec3,
    #[serde(default)]
    pub uniforms: Vec<Uniform>,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub frustum: Frustum,
}

impl Default for SceneObject {
    fn default() -> Self {
        Self {
            name: String::new(),
            object_type: String::new(),
            visible: default_visible(),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: default_scale(),
            uniforms: Vec::new(),
            viewport: Viewport::default(),
            frustum: Frustum::default(),
        }
    }
}

impl SceneObject {
    pub fn uniform(&self, name: &str) -> Option<&PropertyValue> {
        self.uniforms
            .iter()
            .find(|uniform| uniform.name == name)
            .map(|uniform| &uniform.value)
    }
}

/// Named shader input of an appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Uniform {
    pub name: String,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub offset_x: i32,
    pub offset_y: i32,
    pub width: i32,
    pub height: i32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset_x: 0,
            offset_y: 0,
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frustum {
    pub near_plane: f32,
    pub far_plane: f32,
    pub field_of_view: f32,
    pub aspect_ratio: f32,
}

impl Default for Frustum {
    fn default() -> Self {
        Self {
            near_plane: 0.1,
            far_plane: 1000.0,
            field_of_view: 45.0,
            aspect_ratio: 16.0 / 9.0,
        }
    }
}

fn default_visible() -> bool {
    true
}

fn default_scale() -> Vec3 {
    Vec3::ONE
}

fn required_text(node: &Node<'_, '_>, tag: &str) -> Result<String> {
    optional_text(node, tag).ok_or_else(|| anyhow!("<{tag}> tag is missing"))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_vec3(value: Option<String>, default: Vec3) -> Result<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    match PropertyValue::parse(PropertyType::Vec3f, &value) {
        Some(PropertyValue::Vec3f(vector)) => Ok(vector),
        _ => Err(anyhow!("expected three numbers, got '{value}'")),
    }
}

fn parse_viewport(value: Option<String>, default: Viewport) -> Result<Viewport> {
    let Some(value) = value else {
        return Ok(default);
    };
    match PropertyValue::parse(PropertyType::Vec4i, &value) {
        Some(PropertyValue::Vec4i(v)) => Ok(Viewport {
            offset_x: v.x,
            offset_y: v.y,
            width: v.z,
            height: v.w,
        }),
        _ => Err(anyhow!("viewport needs four integers, got '{value}'")),
    }
}

fn parse_f32(value: Option<String>, default: f32) -> Result<f32> {
    match value {
        Some(value) => value
            .parse::<f32>()
            .map_err(|err| anyhow!("failed to parse float: {err}")),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, default: bool) -> Result<bool> {
    match value.as_deref() {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(anyhow!("failed to parse bool: '{other}'")),
    }
}

fn parse_uniform(node: &Node<'_, '_>) -> Result<Uniform> {
    let name = node
        .attribute("name")
        .ok_or_else(|| anyhow!("<uniform> needs a name attribute"))?;
    let type_name = node.attribute("type").unwrap_or("float");
    let Some(ty) = PropertyType::from_name(type_name) else {
        bail!("uniform '{name}' has unknown type '{type_name}'");
    };
    let text = node.text().unwrap_or_default();
    let value = if text.trim().is_empty() {
        ty.default_value()
    } else {
        PropertyValue::parse(ty, text)
    }
    .ok_or_else(|| anyhow!("uniform '{name}': cannot parse '{}' as {ty}", text.trim()))?;
    Ok(Uniform {
        name: name.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    const SAMPLE: &str = r#"
    <scene>
        <object>
            <name>Camera</name>
            <type>camera</type>
            <fov>90</fov>
            <near>0.5</near>
            <viewport>0 0 800 600</viewport>
        </object>
        <object>
            <name>Cube</name>
            <type>mesh</type>
            <visible>false</visible>
            <position>0 5 0</position>
            <uniform name="u_color" type="vec4f">1 0.5 0 1</uniform>
            <uniform name="u_count" type="int32">3</uniform>
        </object>
    </scene>
    "#;

    #[test]
    fn parse_scene_populates_objects() {
        let scene = Scene::from_xml(SAMPLE).unwrap();
        assert_eq!(scene.objects.len(), 2);

        let camera = scene.object("Camera").unwrap();
        assert_eq!(camera.object_type, "camera");
        assert_eq!(camera.frustum.field_of_view, 90.0);
        assert_eq!(camera.frustum.near_plane, 0.5);
        assert_eq!(camera.frustum.far_plane, 1000.0);
        assert_eq!(camera.viewport.width, 800);

        let cube = scene.object("Cube").unwrap();
        assert!(!cube.visible);
        assert_eq!(cube.position, Vec3::new(0.0, 5.0, 0.0));
        assert_eq!(cube.scale, Vec3::ONE);
        assert_eq!(
            cube.uniform("u_color"),
            Some(&PropertyValue::Vec4f(Vec4::new(1.0, 0.5, 0.0, 1.0)))
        );
        assert_eq!(cube.uniform("u_count"), Some(&PropertyValue::Int32(3)));
    }

    #[test]
    fn missing_name_is_an_error() {
        let bad = "<scene><object><type>mesh</type></object></scene>";
        assert!(Scene::from_xml(bad).is_err());
    }

    #[test]
    fn bad_uniform_type_is_an_error() {
        let bad = r#"<scene><object><name>A</name><uniform name="u" type="mat4">1</uniform></object></scene>"#;
        assert!(Scene::from_xml(bad).is_err());
    }
}
