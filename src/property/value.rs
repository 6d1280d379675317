use std::fmt;

use glam::{IVec2, IVec3, IVec4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Declared type of a property. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    Int32,
    Int64,
    Float,
    Bool,
    String,
    Vec2f,
    Vec3f,
    Vec4f,
    Vec2i,
    Vec3i,
    Vec4i,
    Struct,
    Array,
}

impl PropertyType {
    /// Returns `true` for every type that holds a value directly.
    pub const fn is_primitive(self) -> bool {
        !matches!(self, Self::Struct | Self::Array)
    }

    /// Number of scalar components for vector types, 1 for scalars.
    pub const fn component_count(self) -> usize {
        match self {
            Self::Vec2f | Self::Vec2i => 2,
            Self::Vec3f | Self::Vec3i => 3,
            Self::Vec4f | Self::Vec4i => 4,
            _ => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Float => "Float",
            Self::Bool => "Bool",
            Self::String => "String",
            Self::Vec2f => "Vec2f",
            Self::Vec3f => "Vec3f",
            Self::Vec4f => "Vec4f",
            Self::Vec2i => "Vec2i",
            Self::Vec3i => "Vec3i",
            Self::Vec4i => "Vec4i",
            Self::Struct => "Struct",
            Self::Array => "Array",
        }
    }

    /// Zero value for primitive types, `None` for struct and array.
    pub fn default_value(self) -> Option<PropertyValue> {
        Some(match self {
            Self::Int32 => PropertyValue::Int32(0),
            Self::Int64 => PropertyValue::Int64(0),
            Self::Float => PropertyValue::Float(0.0),
            Self::Bool => PropertyValue::Bool(false),
            Self::String => PropertyValue::String(String::new()),
            Self::Vec2f => PropertyValue::Vec2f(Vec2::ZERO),
            Self::Vec3f => PropertyValue::Vec3f(Vec3::ZERO),
            Self::Vec4f => PropertyValue::Vec4f(Vec4::ZERO),
            Self::Vec2i => PropertyValue::Vec2i(IVec2::ZERO),
            Self::Vec3i => PropertyValue::Vec3i(IVec3::ZERO),
            Self::Vec4i => PropertyValue::Vec4i(IVec4::ZERO),
            Self::Struct | Self::Array => return None,
        })
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "int32" | "int" => Self::Int32,
            "int64" => Self::Int64,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "string" => Self::String,
            "vec2f" => Self::Vec2f,
            "vec3f" => Self::Vec3f,
            "vec4f" => Self::Vec4f,
            "vec2i" => Self::Vec2i,
            "vec3i" => Self::Vec3i,
            "vec4i" => Self::Vec4i,
            _ => return None,
        })
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value stored in a primitive property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Bool(bool),
    String(String),
    Vec2f(Vec2),
    Vec3f(Vec3),
    Vec4f(Vec4),
    Vec2i(IVec2),
    Vec3i(IVec3),
    Vec4i(IVec4),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::Int32(_) => PropertyType::Int32,
            Self::Int64(_) => PropertyType::Int64,
            Self::Float(_) => PropertyType::Float,
            Self::Bool(_) => PropertyType::Bool,
            Self::String(_) => PropertyType::String,
            Self::Vec2f(_) => PropertyType::Vec2f,
            Self::Vec3f(_) => PropertyType::Vec3f,
            Self::Vec4f(_) => PropertyType::Vec4f,
            Self::Vec2i(_) => PropertyType::Vec2i,
            Self::Vec3i(_) => PropertyType::Vec3i,
            Self::Vec4i(_) => PropertyType::Vec4i,
        }
    }

    /// Numeric components widened to `f64`, so integer values keep full
    /// precision while interpolated. Empty for bool and string values.
    pub fn components(&self) -> Vec<f64> {
        match self {
            Self::Int32(v) => vec![f64::from(*v)],
            Self::Int64(v) => vec![*v as f64],
            Self::Float(v) => vec![f64::from(*v)],
            Self::Vec2f(v) => v.as_dvec2().to_array().to_vec(),
            Self::Vec3f(v) => v.as_dvec3().to_array().to_vec(),
            Self::Vec4f(v) => v.as_dvec4().to_array().to_vec(),
            Self::Vec2i(v) => v.to_array().map(f64::from).to_vec(),
            Self::Vec3i(v) => v.to_array().map(f64::from).to_vec(),
            Self::Vec4i(v) => v.to_array().map(f64::from).to_vec(),
            Self::Bool(_) | Self::String(_) => Vec::new(),
        }
    }

    /// Builds a numeric value of type `ty` from components. Integer types
    /// round to nearest.
    pub fn from_components(ty: PropertyType, c: &[f64]) -> Option<Self> {
        if ty.is_primitive() && !matches!(ty, PropertyType::Bool | PropertyType::String) {
            if c.len() != ty.component_count() {
                return None;
            }
        }
        let i = |index: usize| c[index].round() as i32;
        let f = |index: usize| c[index] as f32;
        Some(match ty {
            PropertyType::Int32 => Self::Int32(i(0)),
            PropertyType::Int64 => Self::Int64(c[0].round() as i64),
            PropertyType::Float => Self::Float(f(0)),
            PropertyType::Vec2f => Self::Vec2f(Vec2::new(f(0), f(1))),
            PropertyType::Vec3f => Self::Vec3f(Vec3::new(f(0), f(1), f(2))),
            PropertyType::Vec4f => Self::Vec4f(Vec4::new(f(0), f(1), f(2), f(3))),
            PropertyType::Vec2i => Self::Vec2i(IVec2::new(i(0), i(1))),
            PropertyType::Vec3i => Self::Vec3i(IVec3::new(i(0), i(1), i(2))),
            PropertyType::Vec4i => Self::Vec4i(IVec4::new(i(0), i(1), i(2), i(3))),
            _ => return None,
        })
    }

    /// Change detection: like `==`, but float components compare by bit
    /// pattern so a NaN equals the same NaN.
    pub(crate) fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Vec2f(a), Self::Vec2f(b)) => {
                a.to_array().map(f32::to_bits) == b.to_array().map(f32::to_bits)
            }
            (Self::Vec3f(a), Self::Vec3f(b)) => {
                a.to_array().map(f32::to_bits) == b.to_array().map(f32::to_bits)
            }
            (Self::Vec4f(a), Self::Vec4f(b)) => {
                a.to_array().map(f32::to_bits) == b.to_array().map(f32::to_bits)
            }
            _ => self == other,
        }
    }

    /// Parses the textual form used by the CLI and the scene XML:
    /// whitespace or comma separated components.
    pub fn parse(ty: PropertyType, text: &str) -> Option<Self> {
        let text = text.trim();
        match ty {
            PropertyType::Bool => match text {
                "true" | "1" => Some(Self::Bool(true)),
                "false" | "0" => Some(Self::Bool(false)),
                _ => None,
            },
            PropertyType::String => Some(Self::String(text.to_string())),
            PropertyType::Int32 => text.parse().ok().map(Self::Int32),
            PropertyType::Int64 => text.parse().ok().map(Self::Int64),
            PropertyType::Struct | PropertyType::Array => None,
            _ => {
                let components: Vec<f64> = text
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|part| !part.is_empty())
                    .map(str::parse::<f64>)
                    .collect::<Result<_, _>>()
                    .ok()?;
                Self::from_components(ty, &components)
            }
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Vec2f(v) => write!(f, "({}, {})", v.x, v.y),
            Self::Vec3f(v) => write!(f, "({}, {}, {})", v.x, v.y, v.z),
            Self::Vec4f(v) => write!(f, "({}, {}, {}, {})", v.x, v.y, v.z, v.w),
            Self::Vec2i(v) => write!(f, "({}, {})", v.x, v.y),
            Self::Vec3i(v) => write!(f, "({}, {}, {})", v.x, v.y, v.z),
            Self::Vec4i(v) => write!(f, "({}, {}, {}, {})", v.x, v.y, v.z, v.w),
        }
    }
}

/// Rust types that can be read out of a primitive property.
pub trait FromPropertyValue: Sized {
    fn from_property_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! property_value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PropertyValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }

            impl FromPropertyValue for $ty {
                fn from_property_value(value: &PropertyValue) -> Option<Self> {
                    match value {
                        PropertyValue::$variant(inner) => Some(inner.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

property_value_conversions! {
    i32 => Int32,
    i64 => Int64,
    f32 => Float,
    bool => Bool,
    String => String,
    Vec2 => Vec2f,
    Vec3 => Vec3f,
    Vec4 => Vec4f,
    IVec2 => Vec2i,
    IVec3 => Vec3i,
    IVec4 => Vec4i,
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl FromPropertyValue for PropertyValue {
    fn from_property_value(value: &PropertyValue) -> Option<Self> {
        Some(value.clone())
    }
}
