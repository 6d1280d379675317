//! `Type:*()` declarations used inside `interface()`.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Lua, MetaMethod, Result as LuaResult, Table, UserData, UserDataMethods, Value};

use crate::property::{Property, PropertyType};

use super::sandbox::table_entries;

pub(crate) const MAX_ARRAY_SIZE: i64 = 255;

/// Structure of a declared property before it becomes a [`Property`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Shape {
    Primitive(PropertyType),
    Struct(Vec<(String, Shape)>),
    Array(usize, Box<Shape>),
}

impl Shape {
    pub(crate) fn to_property(&self, name: &str) -> Property {
        match self {
            Shape::Primitive(ty) => Property::new(name, *ty),
            Shape::Struct(fields) => Property::new_struct(
                name,
                fields
                    .iter()
                    .map(|(field, shape)| shape.to_property(field))
                    .collect(),
            ),
            Shape::Array(size, element) => Property::new_array(
                name,
                (0..*size).map(|_| element.to_property("")).collect(),
            ),
        }
    }
}

/// Value returned by `Type:Int32()` and friends.
#[derive(Debug, Clone)]
pub(crate) struct TypeDecl(pub(crate) Shape);

impl UserData for TypeDecl {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("Type<{:?}>", this.0))
        });
    }
}

/// The `IN`/`OUT`/`INOUT` collector passed to `interface()`. Assignments
/// declare properties; reads are rejected.
pub(crate) struct InterfaceDecl {
    label: &'static str,
    fields: Rc<RefCell<Vec<(String, Shape)>>>,
}

impl InterfaceDecl {
    pub(crate) fn new(label: &'static str) -> (Self, Rc<RefCell<Vec<(String, Shape)>>>) {
        let fields = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                label,
                fields: Rc::clone(&fields),
            },
            fields,
        )
    }
}

impl UserData for InterfaceDecl {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |_, this, key: Value| {
            Err::<(), _>(mlua::Error::RuntimeError(format!(
                "Cannot read '{}' from {} while declaring the interface",
                describe_key(&key),
                this.label
            )))
        });
        methods.add_meta_method(
            MetaMethod::NewIndex,
            |_, this, (key, value): (Value, Value)| {
                let Value::String(name) = &key else {
                    return Err(mlua::Error::RuntimeError(format!(
                        "Invalid key in {}: property names must be strings, got {}",
                        this.label,
                        key.type_name()
                    )));
                };
                let name = name.to_str()?.to_string();
                let shape = shape_from_lua(&value, &name)?;
                let mut fields = this.fields.borrow_mut();
                if fields.iter().any(|(existing, _)| *existing == name) {
                    return Err(mlua::Error::RuntimeError(format!(
                        "Property '{name}' already declared in {}",
                        this.label
                    )));
                }
                fields.push((name, shape));
                Ok(())
            },
        );
    }
}

/// Reads a declaration: a `Type:*()` value or a table of declarations
/// (a struct, fields sorted by name).
pub(crate) fn shape_from_lua(value: &Value, name: &str) -> LuaResult<Shape> {
    match value {
        Value::UserData(ud) => {
            let decl = ud.borrow::<TypeDecl>().map_err(|_| invalid_declaration(name, value))?;
            Ok(decl.0.clone())
        }
        Value::Table(table) => {
            let mut fields = Vec::new();
            for (key, field) in table_entries(table)? {
                let Value::String(field_name) = &key else {
                    return Err(mlua::Error::RuntimeError(format!(
                        "Invalid field in struct '{name}': field names must be strings, got {}",
                        key.type_name()
                    )));
                };
                let field_name = field_name.to_str()?.to_string();
                let shape = shape_from_lua(&field, &format!("{name}.{field_name}"))?;
                fields.push((field_name, shape));
            }
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(Shape::Struct(fields))
        }
        _ => Err(invalid_declaration(name, value)),
    }
}

fn invalid_declaration(name: &str, value: &Value) -> mlua::Error {
    mlua::Error::RuntimeError(format!(
        "Invalid type declaration for '{name}': expected Type:T() or a table of types, got {}",
        value.type_name()
    ))
}

pub(crate) fn describe_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.to_string_lossy().into_owned(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        other => format!("<{}>", other.type_name()),
    }
}

const PRIMITIVES: [(&str, PropertyType); 11] = [
    ("Int32", PropertyType::Int32),
    ("Int64", PropertyType::Int64),
    ("Float", PropertyType::Float),
    ("Bool", PropertyType::Bool),
    ("String", PropertyType::String),
    ("Vec2f", PropertyType::Vec2f),
    ("Vec3f", PropertyType::Vec3f),
    ("Vec4f", PropertyType::Vec4f),
    ("Vec2i", PropertyType::Vec2i),
    ("Vec3i", PropertyType::Vec3i),
    ("Vec4i", PropertyType::Vec4i),
];

/// Builds the `Type` table. Functions are called with method syntax, so
/// the first argument is the table itself.
pub(crate) fn create_type_table(lua: &Lua) -> LuaResult<Table<'_>> {
    let table = lua.create_table()?;
    for (name, ty) in PRIMITIVES {
        table.raw_set(
            name,
            lua.create_function(move |_, _this: Value| Ok(TypeDecl(Shape::Primitive(ty))))?,
        )?;
    }
    table.raw_set(
        "Array",
        lua.create_function(|_, (_this, size, element): (Value, Value, Value)| {
            let size = match size {
                Value::Integer(size) => size,
                Value::Number(size) if size.fract() == 0.0 => size as i64,
                other => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "Type:Array(n, T) expects an integer size, got {}",
                        other.type_name()
                    )))
                }
            };
            if !(1..=MAX_ARRAY_SIZE).contains(&size) {
                return Err(mlua::Error::RuntimeError(format!(
                    "Type:Array(n, T) size must be in 1..={MAX_ARRAY_SIZE}, got {size}"
                )));
            }
            let element = shape_from_lua(&element, "Array")?;
            Ok(TypeDecl(Shape::Array(size as usize, Box::new(element))))
        })?,
    )?;
    Ok(table)
}
