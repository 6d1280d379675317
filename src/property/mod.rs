//! Typed, nested property trees.
//!
//! Every logic node owns an input and an output tree. Struct and array
//! properties own their children; mutation is always addressed from the
//! root through a child-index path so the cached "has dirty descendant"
//! bit of every ancestor stays in sync with its leaves.

mod value;

use serde::{Deserialize, Serialize};

use crate::graph::LinkKind;

pub use value::{FromPropertyValue, PropertyType, PropertyValue};

/// Errors raised by property reads and writes. Failed writes leave the tree
/// unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    #[error("type mismatch on '{name}': expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: PropertyType,
        actual: PropertyType,
    },
    #[error("property '{0}' has a complex type and holds no value")]
    Complex(String),
    #[error("property '{0}' is the target of a link and cannot be set directly")]
    LinkedInput(String),
    #[error("property '{parent}' has no child '{child}'")]
    ChildNotFound { parent: String, child: String },
    #[error("cannot assign '{0}': structure does not match")]
    ShapeMismatch(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Content {
    Value(PropertyValue),
    Children(Vec<Property>),
}

/// A typed property. Primitive properties hold a [`PropertyValue`]; struct
/// and array properties hold ordered children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    name: String,
    ty: PropertyType,
    content: Content,
    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    incoming: Option<LinkKind>,
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.ty == other.ty && content_eq(&self.content, &other.content)
    }
}

fn content_eq(a: &Content, b: &Content) -> bool {
    match (a, b) {
        (Content::Value(a), Content::Value(b)) => a == b,
        (Content::Children(a), Content::Children(b)) => a == b,
        _ => false,
    }
}

impl Property {
    /// Creates a primitive property holding the type's zero value, or an
    /// empty struct/array.
    pub fn new(name: impl Into<String>, ty: PropertyType) -> Self {
        let content = match ty.default_value() {
            Some(value) => Content::Value(value),
            None => Content::Children(Vec::new()),
        };
        Self {
            name: name.into(),
            ty,
            content,
            dirty: false,
            incoming: None,
        }
    }

    /// Creates a primitive property with an initial value.
    pub fn with_value(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            ty: value.property_type(),
            content: Content::Value(value),
            dirty: false,
            incoming: None,
        }
    }

    pub fn new_struct(name: impl Into<String>, fields: Vec<Property>) -> Self {
        Self {
            name: name.into(),
            ty: PropertyType::Struct,
            content: Content::Children(fields),
            dirty: false,
            incoming: None,
        }
    }

    /// Creates an array; element names are replaced by their index.
    pub fn new_array(name: impl Into<String>, elements: Vec<Property>) -> Self {
        let elements = elements
            .into_iter()
            .enumerate()
            .map(|(index, mut element)| {
                element.name = index.to_string();
                element
            })
            .collect();
        Self {
            name: name.into(),
            ty: PropertyType::Array,
            content: Content::Children(elements),
            dirty: false,
            incoming: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property_type(&self) -> PropertyType {
        self.ty
    }

    pub fn is_primitive(&self) -> bool {
        self.ty.is_primitive()
    }

    /// Leaf: changed since the last clean point. Struct/array: some
    /// descendant is dirty.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn value(&self) -> Option<&PropertyValue> {
        match &self.content {
            Content::Value(value) => Some(value),
            Content::Children(_) => None,
        }
    }

    pub fn get<T: FromPropertyValue>(&self) -> Option<T> {
        self.value().and_then(T::from_property_value)
    }

    pub fn children(&self) -> &[Property] {
        match &self.content {
            Content::Children(children) => children,
            Content::Value(_) => &[],
        }
    }

    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    pub fn child(&self, name: &str) -> Option<&Property> {
        self.children().iter().find(|child| child.name == name)
    }

    pub fn child_at(&self, index: usize) -> Option<&Property> {
        self.children().get(index)
    }

    pub fn child_index(&self, name: &str) -> Option<usize> {
        self.children().iter().position(|child| child.name == name)
    }

    /// Kind of link currently driving this property, if any.
    pub fn incoming_link(&self) -> Option<LinkKind> {
        self.incoming
    }

    /// Stores a value into this primitive property.
    ///
    /// Returns `Ok(true)` when the stored value changed. Fails if the type
    /// differs, if the property is a struct/array, or if a strong link
    /// drives it.
    pub fn set(&mut self, value: impl Into<PropertyValue>) -> Result<bool, PropertyError> {
        if self.incoming == Some(LinkKind::Strong) {
            return Err(PropertyError::LinkedInput(self.name.clone()));
        }
        self.store(value.into())
    }

    fn store(&mut self, value: PropertyValue) -> Result<bool, PropertyError> {
        let name = &self.name;
        let ty = self.ty;
        let Content::Value(current) = &mut self.content else {
            return Err(PropertyError::Complex(name.clone()));
        };
        if value.property_type() != ty {
            return Err(PropertyError::TypeMismatch {
                name: name.clone(),
                expected: ty,
                actual: value.property_type(),
            });
        }
        if current.same_as(&value) {
            return Ok(false);
        }
        *current = value;
        self.dirty = true;
        Ok(true)
    }

    /// Resolves a dotted path such as `"transform.offset.1"`. Struct fields
    /// are addressed by name, array elements by zero-based index.
    pub fn resolve_path(&self, path: &str) -> Option<Vec<usize>> {
        let mut indices = Vec::new();
        let mut current = self;
        for segment in path.split('.').filter(|segment| !segment.is_empty()) {
            let index = match current.ty {
                PropertyType::Array => segment.parse::<usize>().ok()?,
                PropertyType::Struct => current.child_index(segment)?,
                _ => return None,
            };
            current = current.child_at(index)?;
            indices.push(index);
        }
        Some(indices)
    }

    pub fn at(&self, path: &[usize]) -> Option<&Property> {
        path.iter()
            .try_fold(self, |property, &index| property.child_at(index))
    }

    /// Human-readable dotted name of the descendant at `path`.
    pub fn path_name(&self, path: &[usize]) -> String {
        let mut names = vec![self.name.clone()];
        let mut current = self;
        for &index in path {
            match current.child_at(index) {
                Some(child) => {
                    names.push(child.name.clone());
                    current = child;
                }
                None => {
                    names.push(format!("<{index}>"));
                    break;
                }
            }
        }
        names.join(".")
    }

    /// Sets the descendant at `path` and refreshes the cached dirty bits of
    /// every ancestor along the way.
    pub fn set_at(
        &mut self,
        path: &[usize],
        value: impl Into<PropertyValue>,
    ) -> Result<bool, PropertyError> {
        self.write_at(path, value.into(), false)
    }

    /// Link delivery: same as [`set_at`](Self::set_at) but ignores the
    /// linked-input guard.
    pub(crate) fn deliver_at(
        &mut self,
        path: &[usize],
        value: PropertyValue,
    ) -> Result<bool, PropertyError> {
        self.write_at(path, value, true)
    }

    fn write_at(
        &mut self,
        path: &[usize],
        value: PropertyValue,
        from_link: bool,
    ) -> Result<bool, PropertyError> {
        let Some((&first, rest)) = path.split_first() else {
            return if from_link {
                self.store(value)
            } else {
                self.set(value)
            };
        };
        let parent = self.name.clone();
        let child = self
            .children_mut()
            .and_then(|children| children.get_mut(first))
            .ok_or_else(|| PropertyError::ChildNotFound {
                parent,
                child: first.to_string(),
            })?;
        let changed = child.write_at(rest, value, from_link)?;
        if changed {
            self.dirty = true;
        }
        Ok(changed)
    }

    pub(crate) fn set_incoming_at(&mut self, path: &[usize], link: Option<LinkKind>) -> bool {
        match self.at_mut(path) {
            Some(property) => {
                property.incoming = link;
                true
            }
            None => false,
        }
    }

    fn at_mut(&mut self, path: &[usize]) -> Option<&mut Property> {
        let mut current = self;
        for &index in path {
            current = current.children_mut()?.get_mut(index)?;
        }
        Some(current)
    }

    fn children_mut(&mut self) -> Option<&mut Vec<Property>> {
        match &mut self.content {
            Content::Children(children) => Some(children),
            Content::Value(_) => None,
        }
    }

    /// Bulk assignment: copies every leaf of `other` into the matching leaf
    /// of `self`, marking only the leaves whose value changed. The two trees
    /// must have the same structure; on mismatch nothing is written.
    pub fn assign_from(&mut self, other: &Property) -> Result<bool, PropertyError> {
        self.check_assignable(other)?;
        Ok(self.assign_unchecked(other))
    }

    /// [`assign_from`](Self::assign_from) into the subtree at `path`.
    pub(crate) fn assign_at(
        &mut self,
        path: &[usize],
        other: &Property,
    ) -> Result<bool, PropertyError> {
        let Some((&first, rest)) = path.split_first() else {
            return self.assign_from(other);
        };
        let parent = self.name.clone();
        let child = self
            .children_mut()
            .and_then(|children| children.get_mut(first))
            .ok_or_else(|| PropertyError::ChildNotFound {
                parent,
                child: first.to_string(),
            })?;
        let changed = child.assign_at(rest, other)?;
        if changed {
            self.dirty = true;
        }
        Ok(changed)
    }

    fn check_assignable(&self, other: &Property) -> Result<(), PropertyError> {
        if self.ty != other.ty {
            return Err(PropertyError::TypeMismatch {
                name: self.name.clone(),
                expected: self.ty,
                actual: other.ty,
            });
        }
        match (&self.content, &other.content) {
            (Content::Value(current), Content::Value(incoming)) => {
                if self.incoming == Some(LinkKind::Strong) && !current.same_as(incoming) {
                    return Err(PropertyError::LinkedInput(self.name.clone()));
                }
                Ok(())
            }
            (Content::Children(mine), Content::Children(theirs)) => {
                if mine.len() != theirs.len() {
                    return Err(PropertyError::ShapeMismatch(self.name.clone()));
                }
                for (a, b) in mine.iter().zip(theirs) {
                    if a.name != b.name {
                        return Err(PropertyError::ShapeMismatch(self.name.clone()));
                    }
                    a.check_assignable(b)?;
                }
                Ok(())
            }
            _ => Err(PropertyError::ShapeMismatch(self.name.clone())),
        }
    }

    fn assign_unchecked(&mut self, other: &Property) -> bool {
        let changed = match (&mut self.content, &other.content) {
            (Content::Value(current), Content::Value(incoming)) => {
                if !current.same_as(incoming) {
                    *current = incoming.clone();
                    true
                } else {
                    false
                }
            }
            (Content::Children(mine), Content::Children(theirs)) => mine
                .iter_mut()
                .zip(theirs)
                .fold(false, |changed, (a, b)| a.assign_unchecked(b) | changed),
            _ => false,
        };
        if changed {
            self.dirty = true;
        }
        changed
    }

    /// Copies values from `other` into descendants with the same name and
    /// type, ignoring everything else. Used when a script's interface is
    /// re-extracted on load.
    pub(crate) fn copy_matching(&mut self, other: &Property) {
        match (&mut self.content, &other.content) {
            (Content::Value(current), Content::Value(incoming)) => {
                if self.ty == other.ty {
                    *current = incoming.clone();
                }
            }
            (Content::Children(mine), Content::Children(theirs)) => {
                for child in mine.iter_mut() {
                    if let Some(source) = theirs
                        .iter()
                        .find(|candidate| candidate.name == child.name && candidate.ty == child.ty)
                    {
                        child.copy_matching(source);
                    }
                }
            }
            _ => {}
        }
    }

    /// Clears dirty bits on this property and every descendant.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
        if let Some(children) = self.children_mut() {
            children.iter_mut().for_each(Property::clear_dirty);
        }
    }

    pub(crate) fn mark_all_dirty(&mut self) {
        self.dirty = true;
        if let Some(children) = self.children_mut() {
            children.iter_mut().for_each(Property::mark_all_dirty);
        }
    }

    /// Calls `visit` for every primitive descendant with its index path.
    pub fn for_each_leaf(&self, visit: &mut impl FnMut(&[usize], &Property)) {
        let mut path = Vec::new();
        self.walk_leaves(&mut path, visit);
    }

    fn walk_leaves(&self, path: &mut Vec<usize>, visit: &mut impl FnMut(&[usize], &Property)) {
        match &self.content {
            Content::Value(_) => visit(path, self),
            Content::Children(children) => {
                for (index, child) in children.iter().enumerate() {
                    path.push(index);
                    child.walk_leaves(path, visit);
                    path.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn transform() -> Property {
        Property::new_struct(
            "IN",
            vec![
                Property::new("speed", PropertyType::Float),
                Property::new_struct(
                    "transform",
                    vec![
                        Property::new("translation", PropertyType::Vec3f),
                        Property::new_array(
                            "weights",
                            vec![
                                Property::new("", PropertyType::Int32),
                                Property::new("", PropertyType::Int32),
                            ],
                        ),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn set_rejects_type_mismatch_without_change() {
        let mut root = transform();
        let err = root.set_at(&[0], 5i32).unwrap_err();
        assert!(matches!(err, PropertyError::TypeMismatch { .. }));
        assert!(!root.is_dirty());
        assert_eq!(root.at(&[0]).unwrap().get::<f32>(), Some(0.0));
    }

    #[test]
    fn writing_the_same_nan_is_not_a_change() {
        let mut root = transform();
        assert!(root.set_at(&[0], f32::NAN).unwrap());
        root.clear_dirty();
        assert!(!root.set_at(&[0], f32::NAN).unwrap());
        assert!(!root.is_dirty());

        let mut copy = transform();
        copy.set_at(&[0], f32::NAN).unwrap();
        copy.clear_dirty();
        assert!(!copy.assign_from(&root).unwrap());
    }

    #[test]
    fn set_marks_leaf_and_ancestors_dirty() {
        let mut root = transform();
        let path = root.resolve_path("transform.weights.1").unwrap();
        assert_eq!(path, vec![1, 1, 1]);
        assert!(root.set_at(&path, 7i32).unwrap());
        assert!(root.is_dirty());
        assert!(root.at(&[1]).unwrap().is_dirty());
        assert!(root.at(&[1, 1]).unwrap().is_dirty());
        assert!(!root.at(&[0]).unwrap().is_dirty());
    }

    #[test]
    fn setting_identical_value_keeps_property_clean() {
        let mut root = transform();
        assert!(!root.set_at(&[0], 0.0f32).unwrap());
        assert!(!root.is_dirty());
    }

    #[test]
    fn complex_properties_hold_no_value() {
        let mut root = transform();
        assert!(matches!(root.set_at(&[1], 1.0f32), Err(PropertyError::Complex(_))));
        assert!(root.value().is_none());
    }

    #[test]
    fn strong_link_blocks_direct_set_but_not_delivery() {
        let mut root = transform();
        root.set_incoming_at(&[0], Some(LinkKind::Strong));
        assert!(matches!(
            root.set_at(&[0], 2.0f32),
            Err(PropertyError::LinkedInput(_))
        ));
        assert!(root.deliver_at(&[0], PropertyValue::Float(2.0)).unwrap());
        root.set_incoming_at(&[0], Some(LinkKind::Weak));
        assert!(root.set_at(&[0], 3.0f32).unwrap());
    }

    #[test]
    fn assign_from_marks_only_changed_leaves() {
        let mut target = transform();
        let mut source = transform();
        source.set_at(&[1, 0], Vec3::X).unwrap();

        assert!(target.assign_from(&source).unwrap());
        assert!(target.at(&[1, 0]).unwrap().is_dirty());
        assert!(!target.at(&[0]).unwrap().is_dirty());
        assert!(!target.at(&[1, 1]).unwrap().is_dirty());
        assert_eq!(target, source);
    }

    #[test]
    fn assign_from_rejects_mismatching_shape() {
        let mut target = transform();
        let other = Property::new_struct("IN", vec![Property::new("speed", PropertyType::Float)]);
        assert!(matches!(
            target.assign_from(&other),
            Err(PropertyError::ShapeMismatch(_))
        ));
        assert!(!target.is_dirty());
    }

    #[test]
    fn clear_dirty_resets_whole_tree() {
        let mut root = transform();
        root.set_at(&[1, 1, 0], 3i32).unwrap();
        root.clear_dirty();
        assert!(!root.is_dirty());
        assert!(!root.at(&[1, 1, 0]).unwrap().is_dirty());
    }

    #[test]
    fn leaves_are_visited_in_order() {
        let root = transform();
        let mut names = Vec::new();
        root.for_each_leaf(&mut |path, _| names.push(root.path_name(path)));
        assert_eq!(
            names,
            vec![
                "IN.speed",
                "IN.transform.translation",
                "IN.transform.weights.0",
                "IN.transform.weights.1"
            ]
        );
    }

    #[test]
    fn copy_matching_ignores_unknown_fields() {
        let mut target = transform();
        let source = Property::new_struct(
            "IN",
            vec![
                Property::with_value("speed", 4.0f32),
                Property::with_value("removed", 1i32),
            ],
        );
        target.copy_matching(&source);
        assert_eq!(target.child("speed").unwrap().get::<f32>(), Some(4.0));
    }
}
