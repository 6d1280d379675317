//! `IN`/`OUT` access from `run()`.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{IVec2, IVec3, IVec4};
use mlua::{
    Function, Lua, MetaMethod, Result as LuaResult, Table, UserData, UserDataMethods, Value,
};

use crate::property::{Property, PropertyError, PropertyType, PropertyValue};

use super::sandbox::table_entries;
use super::types::describe_key;

/// Lua view onto a struct or array inside a property tree. Primitive
/// children are returned as Lua values, complex ones as nested views.
pub(crate) struct PropertyView {
    tree: Rc<RefCell<Property>>,
    path: Vec<usize>,
    writable: bool,
}

impl PropertyView {
    pub(crate) fn root(tree: Rc<RefCell<Property>>, writable: bool) -> Self {
        Self {
            tree,
            path: Vec::new(),
            writable,
        }
    }

    fn child_view(&self, index: usize) -> Self {
        let mut path = self.path.clone();
        path.push(index);
        Self {
            tree: Rc::clone(&self.tree),
            path,
            writable: self.writable,
        }
    }

    fn snapshot(&self) -> LuaResult<Property> {
        self.tree
            .borrow()
            .at(&self.path)
            .cloned()
            .ok_or_else(|| runtime("property view no longer resolves".to_string()))
    }

    fn index<'lua>(&self, lua: &'lua Lua, key: Value<'lua>) -> LuaResult<Value<'lua>> {
        let tree = self.tree.borrow();
        let node = tree
            .at(&self.path)
            .ok_or_else(|| runtime("property view no longer resolves".to_string()))?;
        let index = locate(node, &key, &tree.path_name(&self.path))?;
        child_to_lua(lua, &node.children()[index], || self.child_view(index))
    }

    fn assign<'lua>(&self, key: Value<'lua>, value: Value<'lua>) -> LuaResult<()> {
        let (full, target, name) = {
            let tree = self.tree.borrow();
            let node = tree
                .at(&self.path)
                .ok_or_else(|| runtime("property view no longer resolves".to_string()))?;
            let index = locate(node, &key, &tree.path_name(&self.path))?;
            let mut full = self.path.clone();
            full.push(index);
            let name = tree.path_name(&full);
            (full, node.children()[index].clone(), name)
        };
        if !self.writable {
            return Err(runtime(format!(
                "Error while writing to '{name}'. Writing input values is not allowed, only outputs!"
            )));
        }
        if target.is_primitive() {
            let converted = lua_to_value(&value, target.property_type(), &name)?;
            self.tree
                .borrow_mut()
                .set_at(&full, converted)
                .map_err(property_error)?;
        } else {
            let mut replacement = target;
            fill_from_lua(&mut replacement, &value, &name)?;
            self.tree
                .borrow_mut()
                .assign_at(&full, &replacement)
                .map_err(property_error)?;
        }
        Ok(())
    }

    fn len(&self) -> LuaResult<usize> {
        Ok(self.snapshot()?.child_count())
    }

    /// Table of the current children, iterated with `next`.
    fn pairs_table<'lua>(&self, lua: &'lua Lua) -> LuaResult<Table<'lua>> {
        let node = self.snapshot()?;
        let table = lua.create_table()?;
        for (index, child) in node.children().iter().enumerate() {
            let value = child_to_lua(lua, child, || self.child_view(index))?;
            match node.property_type() {
                PropertyType::Array => table.raw_set(index + 1, value)?,
                _ => table.raw_set(child.name(), value)?,
            }
        }
        Ok(table)
    }
}

impl UserData for PropertyView {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value| this.index(lua, key));
        methods.add_meta_method(
            MetaMethod::NewIndex,
            |_, this, (key, value): (Value, Value)| this.assign(key, value),
        );
        methods.add_meta_method(MetaMethod::Len, |_, this, ()| this.len());
        methods.add_meta_method(MetaMethod::Pairs, |lua, this, ()| {
            let next: Function = lua.globals().raw_get("next")?;
            Ok((next, this.pairs_table(lua)?, Value::Nil))
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            let tree = this.tree.borrow();
            Ok(tree.path_name(&this.path))
        });
    }
}

fn runtime(message: String) -> mlua::Error {
    mlua::Error::RuntimeError(message)
}

fn property_error(err: PropertyError) -> mlua::Error {
    runtime(err.to_string())
}

fn child_to_lua<'lua>(
    lua: &'lua Lua,
    child: &Property,
    view: impl FnOnce() -> PropertyView,
) -> LuaResult<Value<'lua>> {
    match child.value() {
        Some(value) => value_to_lua(lua, value),
        None => Ok(Value::UserData(lua.create_userdata(view())?)),
    }
}

/// Struct fields by name, array elements by 1-based index.
fn locate(node: &Property, key: &Value, name: &str) -> LuaResult<usize> {
    match node.property_type() {
        PropertyType::Array => {
            let count = node.child_count();
            let index = match key {
                Value::Integer(i) => Some(*i),
                Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
                _ => None,
            };
            match index {
                Some(i) if i >= 1 && (i as usize) <= count => Ok(i as usize - 1),
                Some(i) => Err(runtime(format!(
                    "Index out of range in '{name}'! Expected 0 < index <= {count} but received index == {i}"
                ))),
                None => Err(runtime(format!(
                    "Invalid index access in array '{name}'. Expected an integer, got {}",
                    key.type_name()
                ))),
            }
        }
        _ => {
            let Value::String(field) = key else {
                return Err(runtime(format!(
                    "Bad access to property '{name}'! Expected a string but got object of type {}",
                    key.type_name()
                )));
            };
            let field = field.to_str()?;
            node.child_index(field).ok_or_else(|| {
                runtime(format!(
                    "Tried to access undefined struct property '{}' of '{name}'",
                    describe_key(key)
                ))
            })
        }
    }
}

pub(crate) fn value_to_lua<'lua>(lua: &'lua Lua, value: &PropertyValue) -> LuaResult<Value<'lua>> {
    Ok(match value {
        PropertyValue::Int32(v) => Value::Integer(i64::from(*v)),
        PropertyValue::Int64(v) => Value::Integer(*v),
        PropertyValue::Float(v) => Value::Number(f64::from(*v)),
        PropertyValue::Bool(v) => Value::Boolean(*v),
        PropertyValue::String(v) => Value::String(lua.create_string(v)?),
        PropertyValue::Vec2f(v) => Value::Table(lua.create_sequence_from(v.to_array().map(f64::from))?),
        PropertyValue::Vec3f(v) => Value::Table(lua.create_sequence_from(v.to_array().map(f64::from))?),
        PropertyValue::Vec4f(v) => Value::Table(lua.create_sequence_from(v.to_array().map(f64::from))?),
        PropertyValue::Vec2i(v) => Value::Table(lua.create_sequence_from(v.to_array().map(i64::from))?),
        PropertyValue::Vec3i(v) => Value::Table(lua.create_sequence_from(v.to_array().map(i64::from))?),
        PropertyValue::Vec4i(v) => Value::Table(lua.create_sequence_from(v.to_array().map(i64::from))?),
    })
}

fn mismatch(value: &Value, ty: PropertyType, name: &str) -> mlua::Error {
    runtime(format!(
        "Assigning {} to '{name}' of type {ty}",
        value.type_name()
    ))
}

fn as_float(value: &Value, ty: PropertyType, name: &str) -> LuaResult<f32> {
    match value {
        Value::Integer(i) => Ok(*i as f32),
        Value::Number(n) => Ok(*n as f32),
        other => Err(mismatch(other, ty, name)),
    }
}

fn as_integer(value: &Value, ty: PropertyType, name: &str) -> LuaResult<i64> {
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Number(n) if n.is_finite() && n.fract() == 0.0 => Ok(*n as i64),
        Value::Number(n) => Err(runtime(format!(
            "Implicit rounding during assignment of '{name}': {n} is not an integer"
        ))),
        other => Err(mismatch(other, ty, name)),
    }
}

fn as_i32(value: &Value, ty: PropertyType, name: &str) -> LuaResult<i32> {
    let wide = as_integer(value, ty, name)?;
    i32::try_from(wide)
        .map_err(|_| runtime(format!("Value {wide} does not fit into Int32 property '{name}'")))
}

/// Converts a Lua value for a primitive property of type `ty`.
pub(crate) fn lua_to_value(value: &Value, ty: PropertyType, name: &str) -> LuaResult<PropertyValue> {
    let components = |expected: usize| -> LuaResult<Vec<Value>> {
        let Value::Table(table) = value else {
            return Err(mismatch(value, ty, name));
        };
        let items: Vec<Value> = table.clone().sequence_values::<Value>().collect::<LuaResult<_>>()?;
        if items.len() != expected {
            return Err(runtime(format!(
                "Expected {expected} components for '{name}' of type {ty}, got {}",
                items.len()
            )));
        }
        Ok(items)
    };
    let floats = |expected: usize| -> LuaResult<Vec<f64>> {
        components(expected)?
            .iter()
            .map(|item| as_float(item, ty, name).map(f64::from))
            .collect()
    };
    let ints = |expected: usize| -> LuaResult<Vec<i32>> {
        components(expected)?
            .iter()
            .map(|item| as_i32(item, ty, name))
            .collect()
    };

    Ok(match ty {
        PropertyType::Int32 => PropertyValue::Int32(as_i32(value, ty, name)?),
        PropertyType::Int64 => PropertyValue::Int64(as_integer(value, ty, name)?),
        PropertyType::Float => PropertyValue::Float(as_float(value, ty, name)?),
        PropertyType::Bool => match value {
            Value::Boolean(b) => PropertyValue::Bool(*b),
            other => return Err(mismatch(other, ty, name)),
        },
        PropertyType::String => match value {
            Value::String(s) => PropertyValue::String(s.to_str()?.to_string()),
            other => return Err(mismatch(other, ty, name)),
        },
        PropertyType::Vec2f | PropertyType::Vec3f | PropertyType::Vec4f => {
            let c = floats(ty.component_count())?;
            PropertyValue::from_components(ty, &c).ok_or_else(|| mismatch(value, ty, name))?
        }
        PropertyType::Vec2i => {
            let c = ints(2)?;
            PropertyValue::Vec2i(IVec2::new(c[0], c[1]))
        }
        PropertyType::Vec3i => {
            let c = ints(3)?;
            PropertyValue::Vec3i(IVec3::new(c[0], c[1], c[2]))
        }
        PropertyType::Vec4i => {
            let c = ints(4)?;
            PropertyValue::Vec4i(IVec4::new(c[0], c[1], c[2], c[3]))
        }
        PropertyType::Struct | PropertyType::Array => return Err(mismatch(value, ty, name)),
    })
}

/// Writes a Lua table (or another property view) into a struct or array
/// property, field by field.
fn fill_from_lua(property: &mut Property, value: &Value, name: &str) -> LuaResult<()> {
    match value {
        Value::UserData(ud) => {
            let view = ud
                .borrow::<PropertyView>()
                .map_err(|_| mismatch(value, property.property_type(), name))?;
            let source = view.snapshot()?;
            property.assign_from(&source).map_err(property_error)?;
        }
        Value::Table(table) if property.property_type() == PropertyType::Struct => {
            for (key, field) in table_entries(table)? {
                let Value::String(field_name) = &key else {
                    return Err(runtime(format!(
                        "Invalid key while assigning to struct '{name}': expected a string, got {}",
                        key.type_name()
                    )));
                };
                let field_name = field_name.to_str()?;
                let index = property.child_index(field_name).ok_or_else(|| {
                    runtime(format!(
                        "Unexpected property '{field_name}' while assigning to '{name}'"
                    ))
                })?;
                assign_child(property, index, &field, &format!("{name}.{field_name}"))?;
            }
        }
        Value::Table(table) => {
            let count = property.child_count();
            for (key, _) in table_entries(table)? {
                let valid = matches!(key, Value::Integer(i) if i >= 1 && (i as usize) <= count);
                if !valid {
                    return Err(runtime(format!(
                        "Invalid index '{}' while assigning to array '{name}' of size {count}",
                        describe_key(&key)
                    )));
                }
            }
            for index in 0..count {
                let element: Value = table.get(index + 1)?;
                if !matches!(element, Value::Nil) {
                    assign_child(property, index, &element, &format!("{name}.{}", index + 1))?;
                }
            }
        }
        other => {
            return Err(runtime(format!(
                "Unexpected type {} while assigning to complex property '{name}'",
                other.type_name()
            )))
        }
    }
    Ok(())
}

fn assign_child(property: &mut Property, index: usize, value: &Value, name: &str) -> LuaResult<()> {
    let child = property
        .child_at(index)
        .cloned()
        .ok_or_else(|| runtime(format!("'{name}' does not exist")))?;
    if child.is_primitive() {
        let converted = lua_to_value(value, child.property_type(), name)?;
        property.set_at(&[index], converted).map_err(property_error)?;
    } else {
        let mut replacement = child;
        fill_from_lua(&mut replacement, value, name)?;
        property
            .assign_at(&[index], &replacement)
            .map_err(property_error)?;
    }
    Ok(())
}
