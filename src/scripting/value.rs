use super::fields::FieldRef;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A value as seen by script code.
///
/// Single-valued booleans, numbers and strings travel as primitives. Every
/// other field kind is a [`FieldRef`]. Engine-native objects the bridge does
/// not interpret (functions, plain objects) are carried as [`ForeignValue`].
#[derive(Clone, Default)]
pub enum ScriptValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Field(FieldRef),
    Foreign(ForeignValue),
}

impl ScriptValue {
    pub fn is_nullish(&self) -> bool {
        matches!(self, ScriptValue::Undefined | ScriptValue::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&FieldRef> {
        match self {
            ScriptValue::Field(f) => Some(f),
            _ => None,
        }
    }

    /// Identity comparison: objects are the same instance, primitives are equal.
    pub fn same(&self, other: &ScriptValue) -> bool {
        match (self, other) {
            (ScriptValue::Undefined, ScriptValue::Undefined)
            | (ScriptValue::Null, ScriptValue::Null) => true,
            (ScriptValue::Bool(a), ScriptValue::Bool(b)) => a == b,
            (ScriptValue::Number(a), ScriptValue::Number(b)) => a == b,
            (ScriptValue::String(a), ScriptValue::String(b)) => a == b,
            (ScriptValue::Field(a), ScriptValue::Field(b)) => a.ptr_eq(b),
            (ScriptValue::Foreign(a), ScriptValue::Foreign(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Script-visible type name, used in diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            ScriptValue::Undefined => "undefined".into(),
            ScriptValue::Null => "null".into(),
            ScriptValue::Bool(_) => "boolean".into(),
            ScriptValue::Number(_) => "number".into(),
            ScriptValue::String(_) => "string".into(),
            ScriptValue::Field(f) => f.field_type().name().into(),
            ScriptValue::Foreign(_) => "object".into(),
        }
    }
}

impl fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Undefined => f.write_str("Undefined"),
            ScriptValue::Null => f.write_str("Null"),
            ScriptValue::Bool(b) => write!(f, "Bool({})", b),
            ScriptValue::Number(n) => write!(f, "Number({})", n),
            ScriptValue::String(s) => write!(f, "String({:?})", s),
            ScriptValue::Field(field) => write!(f, "Field({})", field.to_display_string()),
            ScriptValue::Foreign(_) => f.write_str("Foreign"),
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Undefined => f.write_str("undefined"),
            ScriptValue::Null => f.write_str("null"),
            ScriptValue::Bool(b) => write!(f, "{}", b),
            ScriptValue::Number(n) => f.write_str(&format_number(*n)),
            ScriptValue::String(s) => f.write_str(s),
            ScriptValue::Field(field) => f.write_str(&field.to_display_string()),
            ScriptValue::Foreign(_) => f.write_str("[object]"),
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(v: bool) -> Self {
        ScriptValue::Bool(v)
    }
}

impl From<f64> for ScriptValue {
    fn from(v: f64) -> Self {
        ScriptValue::Number(v)
    }
}

impl From<&str> for ScriptValue {
    fn from(v: &str) -> Self {
        ScriptValue::String(v.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(v: String) -> Self {
        ScriptValue::String(v)
    }
}

impl From<FieldRef> for ScriptValue {
    fn from(v: FieldRef) -> Self {
        ScriptValue::Field(v)
    }
}

/// Number formatting matching script `String(n)` for the common cases.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Opaque engine-owned value kept alive by the bridge.
#[derive(Clone)]
pub struct ForeignValue(Rc<dyn Any>);

impl ForeignValue {
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    pub fn ptr_eq(&self, other: &ForeignValue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
