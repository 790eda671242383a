//! Script-visible field objects.
//!
//! Every non-primitive field value a script touches is a [`FieldRef`]: a
//! shared handle to a [`FieldObject`] holding the value, its change flag and
//! the access locks. Property reads and writes arrive by name (`x`, `length`,
//! `3`, `translation`), so the same object model serves any engine binding.

pub mod math;
mod node;

pub use node::{MutationRecord, NodeValue};

use super::value::{format_number, ScriptValue};
use crate::field::{FieldError, FieldType};
use crate::node::NodeRef;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A script write or method call that could not be applied. The field keeps
/// its previous value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldValueError {
    #[error("{0} field is read-only")]
    ReadOnly(FieldType),
    #[error("{field_type} value {value} out of range for {component}")]
    OutOfRange {
        field_type: FieldType,
        component: String,
        value: f64,
    },
    #[error("Index {index} out of bounds for {field_type}")]
    IndexOutOfBounds { field_type: FieldType, index: usize },
    #[error("Invalid value for {field_type}: expected {expected}, got {got}")]
    InvalidValue {
        field_type: FieldType,
        expected: &'static str,
        got: String,
    },
    #[error("Unknown property {property} on {field_type}")]
    UnknownProperty {
        field_type: FieldType,
        property: String,
    },
    #[error("Unknown method {method} on {field_type}")]
    UnknownMethod {
        field_type: FieldType,
        method: String,
    },
    #[error("Field {0} cannot be read from a script")]
    NotReadable(String),
    #[error("Not a writable field: {0}")]
    NotWritable(String),
    #[error("Unknown field {0}")]
    UnknownField(String),
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Most elements a script can grow a multi-valued field to, and most pixels
/// in an image it builds or resizes.
pub const MAX_ELEMENTS: usize = 1 << 22;

/// `width * height`, or `None` when it overflows or a side is negative.
pub(crate) fn pixel_count(width: i32, height: i32) -> Option<usize> {
    let width = usize::try_from(width).ok()?;
    let height = usize::try_from(height).ok()?;
    width.checked_mul(height)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageValue {
    pub width: i32,
    pub height: i32,
    pub components: i32,
    pub pixels: Vec<i32>,
}

impl ImageValue {
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            components: 0,
            pixels: Vec::new(),
        }
    }

    /// Parse `[width, height, components, pixel...]`.
    pub fn from_raw(raw: &[i32]) -> Option<Self> {
        if raw.len() < 3 {
            return None;
        }
        let (width, height, components) = (raw[0], raw[1], raw[2]);
        let pixels = &raw[3..];
        if !(0..=4).contains(&components) {
            return None;
        }
        let count = pixel_count(width, height)?;
        (pixels.len() == count).then(|| Self {
            width,
            height,
            components,
            pixels: pixels.to_vec(),
        })
    }

    pub fn to_raw(&self) -> Vec<i32> {
        let mut raw = Vec::with_capacity(self.pixels.len() + 3);
        raw.extend_from_slice(&[self.width, self.height, self.components]);
        raw.extend_from_slice(&self.pixels);
        raw
    }

    /// Resize the pixel array to the current dimensions. False, leaving the
    /// pixels alone, when the image would exceed [`MAX_ELEMENTS`].
    fn resize(&mut self) -> bool {
        match pixel_count(self.width, self.height) {
            Some(count) if count <= MAX_ELEMENTS => {
                self.pixels.resize(count, 0);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Vectors, colors and rotations. Unused trailing slots stay zero.
    Tuple([f64; 4]),
    Image(ImageValue),
    /// Elements of a multi-valued field, already coerced to the element kind.
    List(Vec<ScriptValue>),
    Node(NodeValue),
}

/// Mutable container for one field value seen by a script.
#[derive(Debug)]
pub struct FieldObject {
    field_type: FieldType,
    value: FieldValue,
    changed: bool,
    read_only: bool,
    script_field: bool,
    /// Node and field this value belongs to, for node-typed values.
    owner: Option<(NodeRef, usize)>,
}

/// Shared handle to a [`FieldObject`].
#[derive(Clone)]
pub struct FieldRef(Rc<RefCell<FieldObject>>);

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldRef({})", self.to_display_string())
    }
}

pub(crate) fn default_tuple(field_type: FieldType) -> [f64; 4] {
    if field_type.single() == FieldType::SFRotation {
        [0.0, 0.0, 1.0, 0.0]
    } else {
        [0.0; 4]
    }
}

fn tuple_names(field_type: FieldType) -> &'static [&'static str] {
    let names: &'static [&'static str] = match field_type {
        FieldType::SFColor | FieldType::SFColorRGBA => &["r", "g", "b", "a"],
        FieldType::SFRotation => &["x", "y", "z", "angle"],
        _ => &["x", "y", "z", "w"],
    };
    &names[..field_type.components()]
}

fn is_vector(field_type: FieldType) -> bool {
    field_type.is_tuple()
        && !matches!(
            field_type,
            FieldType::SFColor | FieldType::SFColorRGBA | FieldType::SFRotation
        )
}

fn invalid(field_type: FieldType, expected: &'static str, got: &ScriptValue) -> FieldValueError {
    FieldValueError::InvalidValue {
        field_type,
        expected,
        got: got.type_name(),
    }
}

fn arg_number(field_type: FieldType, args: &[ScriptValue], i: usize) -> Result<f64, FieldValueError> {
    let arg = args.get(i).unwrap_or(&ScriptValue::Undefined);
    arg.as_number().ok_or_else(|| invalid(field_type, "number", arg))
}

fn arg_field(
    field_type: FieldType,
    args: &[ScriptValue],
    i: usize,
    expected: FieldType,
) -> Result<FieldRef, FieldValueError> {
    let arg = args.get(i).unwrap_or(&ScriptValue::Undefined);
    match arg.as_field() {
        Some(f) if f.field_type() == expected => Ok(f.clone()),
        _ => Err(invalid(field_type, expected.name(), arg)),
    }
}

impl FieldRef {
    fn from_value(field_type: FieldType, value: FieldValue) -> Self {
        Self(Rc::new(RefCell::new(FieldObject {
            field_type,
            value,
            changed: false,
            read_only: false,
            script_field: false,
            owner: None,
        })))
    }

    pub fn tuple(field_type: FieldType, components: [f64; 4]) -> Self {
        Self::from_value(field_type, FieldValue::Tuple(components))
    }

    pub fn image(field_type: FieldType, image: ImageValue) -> Self {
        Self::from_value(field_type, FieldValue::Image(image))
    }

    pub fn list(field_type: FieldType, items: Vec<ScriptValue>) -> Self {
        Self::from_value(field_type, FieldValue::List(items))
    }

    pub fn node(node: NodeRef) -> Self {
        Self::from_value(FieldType::SFNode, FieldValue::Node(NodeValue::new(node)))
    }

    pub fn field_type(&self) -> FieldType {
        self.0.borrow().field_type
    }

    pub fn ptr_eq(&self, other: &FieldRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_read_only(&self) -> bool {
        self.0.borrow().read_only
    }

    pub fn is_script_field(&self) -> bool {
        self.0.borrow().script_field
    }

    /// Lock or unlock the value, together with every element it holds.
    pub fn set_read_only(&self, read_only: bool) {
        for child in self.set_flags(|obj| obj.read_only = read_only) {
            child.set_read_only(read_only);
        }
    }

    /// Mark the value as the script's own internal field, together with
    /// every element it holds.
    pub fn set_script_field(&self, script_field: bool) {
        for child in self.set_flags(|obj| obj.script_field = script_field) {
            child.set_script_field(script_field);
        }
    }

    fn set_flags(&self, f: impl FnOnce(&mut FieldObject)) -> Vec<FieldRef> {
        let mut obj = self.0.borrow_mut();
        f(&mut obj);
        obj.child_fields()
    }

    pub fn owner(&self) -> Option<(NodeRef, usize)> {
        self.0.borrow().owner.clone()
    }

    pub fn set_owner(&self, owner: Option<(NodeRef, usize)>) {
        self.0.borrow_mut().owner = owner;
    }

    pub fn mark_changed(&self) {
        self.0.borrow_mut().changed = true;
    }

    /// Whether the value, one of its elements, or (for node values) one of
    /// the referenced node's fields changed since the last consume/drain.
    pub fn has_changed(&self) -> bool {
        let children = {
            let obj = self.0.borrow();
            match &obj.value {
                FieldValue::Node(_) => None,
                _ if obj.changed => return true,
                FieldValue::List(_) => Some(obj.child_fields()),
                _ => return false,
            }
        };
        match children {
            Some(children) => children.iter().any(FieldRef::has_changed),
            None => self.node_collect(),
        }
    }

    /// Clear the change flag of the value and its non-node elements.
    /// Buffered node mutations are only cleared by [`FieldRef::drain_changes`].
    pub fn consume_changed(&self) {
        let children = {
            let mut obj = self.0.borrow_mut();
            obj.changed = false;
            obj.child_fields()
        };
        for child in children {
            if !child.field_type().is_node() {
                child.consume_changed();
            }
        }
    }

    /// Components of a tuple value.
    pub fn components(&self) -> Option<[f64; 4]> {
        match &self.0.borrow().value {
            FieldValue::Tuple(c) => Some(*c),
            _ => None,
        }
    }

    pub fn image_value(&self) -> Option<ImageValue> {
        match &self.0.borrow().value {
            FieldValue::Image(img) => Some(img.clone()),
            _ => None,
        }
    }

    pub fn elements(&self) -> Option<Vec<ScriptValue>> {
        match &self.0.borrow().value {
            FieldValue::List(items) => Some(items.clone()),
            _ => None,
        }
    }

    /// The node referenced by an `SFNode` value.
    pub fn node_ref(&self) -> Option<NodeRef> {
        match &self.0.borrow().value {
            FieldValue::Node(nv) => Some(nv.node().clone()),
            _ => None,
        }
    }

    /// A detached copy: same type and data, fresh flags. Node values keep
    /// referring to the same node.
    pub fn duplicate(&self) -> FieldRef {
        let (field_type, value) = {
            let obj = self.0.borrow();
            (obj.field_type, obj.value.clone())
        };
        let value = match value {
            FieldValue::List(items) => FieldValue::List(
                items
                    .into_iter()
                    .map(|item| match item {
                        ScriptValue::Field(f) if !f.field_type().is_node() => {
                            ScriptValue::Field(f.duplicate())
                        }
                        other => other,
                    })
                    .collect(),
            ),
            FieldValue::Node(nv) => FieldValue::Node(NodeValue::new(nv.node().clone())),
            other => other,
        };
        FieldRef::from_value(field_type, value)
    }

    /// Take every pending mutation this value carries.
    ///
    /// Node values yield one record per changed field of the referenced node
    /// (recursing into node-valued children). Other values yield a single
    /// record for themselves, attributed to their owner, when changed.
    pub fn drain_changes(&self) -> Vec<MutationRecord> {
        let field_type = self.field_type();
        if field_type == FieldType::SFNode {
            return self.node_drain();
        }
        let mut records = Vec::new();
        if field_type == FieldType::MFNode {
            let children = self.0.borrow().child_fields();
            for child in children {
                records.extend(child.drain_changes());
            }
            let mut obj = self.0.borrow_mut();
            if obj.changed {
                obj.changed = false;
                records.push(MutationRecord {
                    target: obj.owner.clone(),
                    value: ScriptValue::Field(self.clone()),
                });
            }
        } else if self.has_changed() {
            self.consume_changed();
            records.push(MutationRecord {
                target: self.owner(),
                value: ScriptValue::Field(self.clone()),
            });
        }
        records
    }

    fn check_writable(&self) -> Result<(), FieldValueError> {
        let obj = self.0.borrow();
        if obj.read_only && (obj.field_type.is_node() || !obj.script_field) {
            Err(FieldValueError::ReadOnly(obj.field_type))
        } else {
            Ok(())
        }
    }

    /// Read a named property: a component (`x`, `r`, `angle`), an element
    /// index, `length`, an image attribute or a field of a referenced node.
    /// Unknown names read as undefined.
    pub fn get(&self, key: &str) -> Result<ScriptValue, FieldValueError> {
        let field_type = self.field_type();
        if field_type == FieldType::SFNode {
            return self.node_get(key);
        }
        let obj = self.0.borrow();
        let value = match &obj.value {
            FieldValue::Tuple(c) => tuple_slot(field_type, key)
                .map(|i| ScriptValue::Number(c[i]))
                .unwrap_or_default(),
            FieldValue::Image(img) => match key {
                "width" | "x" => ScriptValue::Number(img.width as f64),
                "height" | "y" => ScriptValue::Number(img.height as f64),
                "comp" => ScriptValue::Number(img.components as f64),
                "array" => ScriptValue::Field(FieldRef::list(
                    FieldType::MFInt32,
                    img.pixels.iter().map(|&p| ScriptValue::Number(p as f64)).collect(),
                )),
                _ => ScriptValue::Undefined,
            },
            FieldValue::List(items) => match key {
                "length" => ScriptValue::Number(items.len() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            },
            FieldValue::Node(_) => ScriptValue::Undefined,
        };
        Ok(value)
    }

    /// Write a named property. On error the value is left untouched.
    pub fn set(&self, key: &str, value: &ScriptValue) -> Result<(), FieldValueError> {
        self.check_writable()?;
        let field_type = self.field_type();
        if field_type == FieldType::SFNode {
            return self.node_set(key, value);
        }
        if field_type.is_multi() {
            return self.list_set(key, value);
        }
        let mut obj = self.0.borrow_mut();
        match &mut obj.value {
            FieldValue::Tuple(c) => {
                let slot = match tuple_slot(field_type, key) {
                    Some(slot) => slot,
                    None => {
                        return Err(match key.parse::<usize>() {
                            Ok(index) => FieldValueError::IndexOutOfBounds { field_type, index },
                            Err(_) => FieldValueError::UnknownProperty {
                                field_type,
                                property: key.to_string(),
                            },
                        })
                    }
                };
                let n = value
                    .as_number()
                    .ok_or_else(|| invalid(field_type, "number", value))?;
                check_component(field_type, tuple_names(field_type)[slot], n)?;
                c[slot] = n;
            }
            FieldValue::Image(img) => {
                let mut next = img.clone();
                match key {
                    "width" | "x" | "height" | "y" | "comp" => {
                        let n = value
                            .as_number()
                            .ok_or_else(|| invalid(field_type, "number", value))?;
                        let limit = if key == "comp" { 4.0 } else { f64::from(i32::MAX) };
                        if !(0.0..=limit).contains(&n) {
                            return Err(FieldValueError::OutOfRange {
                                field_type,
                                component: key.to_string(),
                                value: n,
                            });
                        }
                        match key {
                            "width" | "x" => next.width = n as i32,
                            "height" | "y" => next.height = n as i32,
                            _ => next.components = n as i32,
                        }
                        if !next.resize() {
                            return Err(FieldValueError::OutOfRange {
                                field_type,
                                component: key.to_string(),
                                value: n,
                            });
                        }
                    }
                    "array" => {
                        let pixels = value
                            .as_field()
                            .filter(|f| f.field_type() == FieldType::MFInt32)
                            .and_then(|f| f.elements())
                            .ok_or_else(|| invalid(field_type, "MFInt32", value))?;
                        if pixels.len() != next.pixels.len() {
                            return Err(FieldValueError::OutOfRange {
                                field_type,
                                component: "array".into(),
                                value: pixels.len() as f64,
                            });
                        }
                        next.pixels = pixels
                            .iter()
                            .map(|p| p.as_number().unwrap_or(0.0) as i32)
                            .collect();
                    }
                    _ => {
                        return Err(FieldValueError::UnknownProperty {
                            field_type,
                            property: key.to_string(),
                        })
                    }
                }
                *img = next;
            }
            FieldValue::List(_) | FieldValue::Node(_) => {}
        }
        obj.changed = true;
        Ok(())
    }

    fn list_set(&self, key: &str, value: &ScriptValue) -> Result<(), FieldValueError> {
        let field_type = self.field_type();
        let element_type = field_type.single();
        let (read_only, script_field) = {
            let obj = self.0.borrow();
            (obj.read_only, obj.script_field)
        };
        let make_default = || {
            let item = default_element(element_type);
            if let ScriptValue::Field(f) = &item {
                f.set_read_only(read_only);
                f.set_script_field(script_field);
            }
            item
        };
        if key == "length" {
            let n = value
                .as_number()
                .filter(|n| *n >= 0.0 && n.fract() == 0.0)
                .ok_or_else(|| invalid(field_type, "non-negative integer", value))?;
            if n > MAX_ELEMENTS as f64 {
                return Err(FieldValueError::OutOfRange {
                    field_type,
                    component: "length".into(),
                    value: n,
                });
            }
            let mut obj = self.0.borrow_mut();
            if let FieldValue::List(items) = &mut obj.value {
                items.resize_with(n as usize, make_default);
            }
            obj.changed = true;
            return Ok(());
        }
        let index = key
            .parse::<usize>()
            .map_err(|_| FieldValueError::UnknownProperty {
                field_type,
                property: key.to_string(),
            })?;
        if index >= MAX_ELEMENTS {
            return Err(FieldValueError::IndexOutOfBounds { field_type, index });
        }
        let item = coerce_element(element_type, value)?;
        if let ScriptValue::Field(f) = &item {
            if !element_type.is_node() {
                f.set_read_only(read_only);
                f.set_script_field(script_field);
            }
        }
        let mut obj = self.0.borrow_mut();
        if let FieldValue::List(items) = &mut obj.value {
            if index >= items.len() {
                items.resize_with(index + 1, make_default);
            }
            items[index] = item;
        }
        obj.changed = true;
        Ok(())
    }

    /// Whether `name` is a callable method of this value.
    pub fn is_method(&self, name: &str) -> bool {
        let field_type = self.field_type();
        if matches!(name, "toString" | "equals") {
            return true;
        }
        match field_type {
            FieldType::SFColor | FieldType::SFColorRGBA => {
                matches!(name, "setHSV" | "getHSV")
            }
            FieldType::SFRotation => matches!(
                name,
                "getAxis" | "setAxis" | "inverse" | "multiply" | "multVec" | "slerp"
            ),
            FieldType::SFNode => matches!(name, "getNodeName" | "getNodeType"),
            ft if is_vector(ft) => {
                matches!(
                    name,
                    "add" | "subtract" | "multiply" | "divide" | "dot" | "length" | "normalize"
                        | "negate"
                ) || (name == "cross" && ft.components() == 3)
            }
            _ => false,
        }
    }

    /// Call a method. Mutating methods honour the read-only lock.
    pub fn invoke(&self, name: &str, args: &[ScriptValue]) -> Result<ScriptValue, FieldValueError> {
        let field_type = self.field_type();
        if !self.is_method(name) {
            return Err(FieldValueError::UnknownMethod {
                field_type,
                method: name.to_string(),
            });
        }
        match name {
            "toString" => return Ok(ScriptValue::String(self.to_display_string())),
            "equals" => {
                let other = args.first().and_then(ScriptValue::as_field);
                return Ok(ScriptValue::Bool(other.is_some_and(|o| self.value_eq(o))));
            }
            // DEF name, empty for an unnamed node
            "getNodeName" => {
                return Ok(self
                    .node_ref()
                    .map(|n| ScriptValue::String(n.def_name().unwrap_or_default()))
                    .unwrap_or_default())
            }
            "getNodeType" => {
                return Ok(self
                    .node_ref()
                    .map(|n| ScriptValue::String(n.node_name()))
                    .unwrap_or_default())
            }
            _ => {}
        }
        let c = self.components().unwrap_or_default();
        let width = field_type.components();
        match field_type {
            FieldType::SFColor | FieldType::SFColorRGBA => match name {
                "setHSV" => {
                    self.check_writable()?;
                    let h = arg_number(field_type, args, 0)?;
                    let s = arg_number(field_type, args, 1)?;
                    let v = arg_number(field_type, args, 2)?;
                    for (component, n) in [("s", s), ("v", v)] {
                        if !(0.0..=1.0).contains(&n) {
                            return Err(FieldValueError::OutOfRange {
                                field_type,
                                component: component.into(),
                                value: n,
                            });
                        }
                    }
                    let [r, g, b] = math::hsv_to_rgb(h, s, v);
                    self.replace_tuple([r, g, b, c[3]]);
                    Ok(ScriptValue::Undefined)
                }
                _ => {
                    let hsv = math::rgb_to_hsv(c[0], c[1], c[2]);
                    Ok(ScriptValue::Field(FieldRef::list(
                        FieldType::MFFloat,
                        hsv.iter().map(|&n| ScriptValue::Number(n)).collect(),
                    )))
                }
            },
            FieldType::SFRotation => match name {
                "getAxis" => Ok(ScriptValue::Field(FieldRef::tuple(
                    FieldType::SFVec3f,
                    [c[0], c[1], c[2], 0.0],
                ))),
                "setAxis" => {
                    self.check_writable()?;
                    let axis = arg_field(field_type, args, 0, FieldType::SFVec3f)?
                        .components()
                        .unwrap_or_default();
                    if math::length(&axis[..3]) == 0.0 {
                        return Err(FieldValueError::OutOfRange {
                            field_type,
                            component: "axis".into(),
                            value: 0.0,
                        });
                    }
                    self.replace_tuple([axis[0], axis[1], axis[2], c[3]]);
                    Ok(ScriptValue::Undefined)
                }
                "inverse" => Ok(ScriptValue::Field(FieldRef::tuple(
                    field_type,
                    [c[0], c[1], c[2], -c[3]],
                ))),
                "multiply" => {
                    let other = arg_field(field_type, args, 0, field_type)?
                        .components()
                        .unwrap_or_default();
                    Ok(ScriptValue::Field(FieldRef::tuple(
                        field_type,
                        math::rotation_multiply(c, other),
                    )))
                }
                "multVec" => {
                    let v = arg_field(field_type, args, 0, FieldType::SFVec3f)?
                        .components()
                        .unwrap_or_default();
                    let [x, y, z] = math::rotate_vector(c, [v[0], v[1], v[2]]);
                    Ok(ScriptValue::Field(FieldRef::tuple(
                        FieldType::SFVec3f,
                        [x, y, z, 0.0],
                    )))
                }
                _ => {
                    let dest = arg_field(field_type, args, 0, field_type)?
                        .components()
                        .unwrap_or_default();
                    let t = arg_number(field_type, args, 1)?;
                    Ok(ScriptValue::Field(FieldRef::tuple(
                        field_type,
                        math::slerp(c, dest, t),
                    )))
                }
            },
            _ => {
                let vector = |out: Vec<f64>| {
                    let mut comps = [0.0; 4];
                    comps[..width].copy_from_slice(&out[..width]);
                    ScriptValue::Field(FieldRef::tuple(field_type, comps))
                };
                let other = |i| {
                    arg_field(field_type, args, i, field_type)
                        .map(|f| f.components().unwrap_or_default())
                };
                let a = &c[..width];
                match name {
                    "add" | "subtract" => {
                        let b = other(0)?;
                        let sign = if name == "add" { 1.0 } else { -1.0 };
                        Ok(vector(a.iter().zip(&b).map(|(x, y)| x + sign * y).collect()))
                    }
                    "multiply" => {
                        let s = arg_number(field_type, args, 0)?;
                        Ok(vector(a.iter().map(|x| x * s).collect()))
                    }
                    "divide" => {
                        let s = arg_number(field_type, args, 0)?;
                        Ok(vector(a.iter().map(|x| x / s).collect()))
                    }
                    "dot" => Ok(ScriptValue::Number(math::dot(a, &other(0)?[..width]))),
                    "length" => Ok(ScriptValue::Number(math::length(a))),
                    "normalize" => Ok(vector(math::normalize(a))),
                    "negate" => Ok(vector(a.iter().map(|x| -x).collect())),
                    _ => {
                        let b = other(0)?;
                        Ok(vector(
                            math::cross([a[0], a[1], a[2]], [b[0], b[1], b[2]]).to_vec(),
                        ))
                    }
                }
            }
        }
    }

    fn replace_tuple(&self, components: [f64; 4]) {
        let mut obj = self.0.borrow_mut();
        obj.value = FieldValue::Tuple(components);
        obj.changed = true;
    }

    /// Value equality: same type and data, identity for nodes.
    pub fn value_eq(&self, other: &FieldRef) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let (a, b) = (self.0.borrow(), other.0.borrow());
        if a.field_type != b.field_type {
            return false;
        }
        match (&a.value, &b.value) {
            (FieldValue::Tuple(x), FieldValue::Tuple(y)) => x == y,
            (FieldValue::Image(x), FieldValue::Image(y)) => x == y,
            (FieldValue::Node(x), FieldValue::Node(y)) => x.node().ptr_eq(y.node()),
            (FieldValue::List(x), FieldValue::List(y)) => {
                x.len() == y.len()
                    && x.iter().zip(y).all(|(p, q)| match (p, q) {
                        (ScriptValue::Field(p), ScriptValue::Field(q)) => p.value_eq(q),
                        (p, q) => p.same(q),
                    })
            }
            _ => false,
        }
    }

    /// Text form used by `toString` and `print`.
    pub fn to_display_string(&self) -> String {
        let Ok(obj) = self.0.try_borrow() else {
            return "[object]".to_string();
        };
        match &obj.value {
            FieldValue::Tuple(c) => c[..obj.field_type.components()]
                .iter()
                .map(|n| format_number(*n))
                .collect::<Vec<_>>()
                .join(" "),
            FieldValue::Image(img) => {
                let mut parts = vec![
                    img.width.to_string(),
                    img.height.to_string(),
                    img.components.to_string(),
                ];
                parts.extend(img.pixels.iter().map(|p| format!("{:#x}", p)));
                parts.join(" ")
            }
            FieldValue::List(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        ScriptValue::String(s) if obj.field_type == FieldType::MFString => {
                            format!("{:?}", s)
                        }
                        other => other.to_string(),
                    })
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            FieldValue::Node(nv) => format!("{} {{ }}", nv.node_name()),
        }
    }
}

impl FieldObject {
    /// Element field objects held by a list value.
    fn child_fields(&self) -> Vec<FieldRef> {
        match &self.value {
            FieldValue::List(items) => items
                .iter()
                .filter_map(|item| item.as_field().cloned())
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn tuple_slot(field_type: FieldType, key: &str) -> Option<usize> {
    let names = tuple_names(field_type);
    names.iter().position(|n| *n == key).or_else(|| {
        key.parse::<usize>()
            .ok()
            .filter(|&i| i < names.len())
    })
}

/// Range rule for one tuple component.
pub(crate) fn check_component(
    field_type: FieldType,
    component: &str,
    value: f64,
) -> Result<(), FieldValueError> {
    let color = matches!(field_type, FieldType::SFColor | FieldType::SFColorRGBA);
    if !value.is_finite() || (color && !(0.0..=1.0).contains(&value)) {
        return Err(FieldValueError::OutOfRange {
            field_type,
            component: component.to_string(),
            value,
        });
    }
    Ok(())
}

/// Fresh element value for a list of `element_type`.
pub(crate) fn default_element(element_type: FieldType) -> ScriptValue {
    use FieldType::*;
    match element_type {
        SFBool => ScriptValue::Bool(false),
        SFString => ScriptValue::String(String::new()),
        SFNode => ScriptValue::Null,
        SFImage => ScriptValue::Field(FieldRef::image(SFImage, ImageValue::empty())),
        ft if ft.is_tuple() => ScriptValue::Field(FieldRef::tuple(ft, default_tuple(ft))),
        _ => ScriptValue::Number(0.0),
    }
}

/// Convert a script value into an element of `element_type`. Object
/// elements other than nodes are copied so the list owns its data.
pub(crate) fn coerce_element(
    element_type: FieldType,
    value: &ScriptValue,
) -> Result<ScriptValue, FieldValueError> {
    use FieldType::*;
    let list_type = element_type.multi();
    match (element_type, value) {
        (SFBool, ScriptValue::Bool(_)) | (SFString, ScriptValue::String(_)) => Ok(value.clone()),
        (SFInt32 | SFLong, ScriptValue::Number(n)) => Ok(ScriptValue::Number(n.trunc())),
        (SFFloat | SFDouble | SFTime, ScriptValue::Number(_)) => Ok(value.clone()),
        (SFNode, v) if v.is_nullish() => Ok(ScriptValue::Null),
        (SFNode, ScriptValue::Field(f)) if f.field_type() == SFNode => Ok(value.clone()),
        (ft, ScriptValue::Field(f)) if f.field_type() == ft && !ft.is_primitive() => {
            Ok(ScriptValue::Field(f.duplicate()))
        }
        (ft, v) => Err(invalid(list_type, expected_name(ft), v)),
    }
}

fn expected_name(element_type: FieldType) -> &'static str {
    match element_type {
        FieldType::SFBool => "boolean",
        FieldType::SFString => "string",
        ft if ft.is_primitive() => "number",
        ft => ft.name(),
    }
}
