use super::value::ScriptValue;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

/// Per-script namespace.
///
/// Names resolve in a fixed order: declared fields, eventOuts, the standard
/// bindings (`TRUE`, `FALSE`, `Browser`), then whatever the script bound
/// itself. Nothing is enumerable: a script only reaches the names it knows.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    fields: FxHashMap<SmolStr, ScriptValue>,
    event_outs: FxHashMap<SmolStr, ScriptValue>,
    event_out_names: FxHashMap<usize, SmolStr>,
    standard: FxHashMap<SmolStr, ScriptValue>,
    functions: FxHashMap<SmolStr, ScriptValue>,
    changed: FxHashSet<SmolStr>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        let mut ctx = Self::default();
        ctx.standard.insert("TRUE".into(), ScriptValue::Bool(true));
        ctx.standard.insert("FALSE".into(), ScriptValue::Bool(false));
        ctx
    }

    /// Bind a standard object such as `Browser`.
    pub fn set_standard(&mut self, name: &str, value: ScriptValue) {
        self.standard.insert(name.into(), value);
    }

    /// Register an initializeOnly field. Writes replace it but are never
    /// tracked.
    pub fn add_field(&mut self, name: &str, value: ScriptValue) {
        self.fields.insert(name.into(), value);
    }

    /// Register a change-tracked output.
    pub fn add_event_out(&mut self, name: &str, field_index: usize, value: ScriptValue) {
        self.event_outs.insert(name.into(), value);
        self.event_out_names.insert(field_index, name.into());
    }

    pub fn is_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn is_event_out(&self, name: &str) -> bool {
        self.event_outs.contains_key(name)
    }

    /// Name of the eventOut registered for a node field index.
    pub fn event_out_name(&self, field_index: usize) -> Option<&str> {
        self.event_out_names.get(&field_index).map(SmolStr::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
            || self.event_outs.contains_key(name)
            || self.standard.contains_key(name)
            || self.functions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<ScriptValue> {
        self.fields
            .get(name)
            .or_else(|| self.event_outs.get(name))
            .or_else(|| self.standard.get(name))
            .or_else(|| self.functions.get(name))
            .cloned()
    }

    /// Script-level assignment.
    pub fn put(&mut self, name: &str, value: ScriptValue) {
        if let Some(slot) = self.fields.get_mut(name) {
            *slot = value;
        } else if let Some(slot) = self.event_outs.get_mut(name) {
            *slot = value;
            self.changed.insert(name.into());
        } else if self.standard.contains_key(name) {
            log::debug!("Ignoring assignment to standard binding {}", name);
        } else {
            self.functions.insert(name.into(), value);
        }
    }

    /// A binding the script created itself.
    pub fn function(&self, name: &str) -> Option<ScriptValue> {
        self.functions.get(name).cloned()
    }

    pub fn has_any_changed(&self) -> bool {
        !self.changed.is_empty()
            || self
                .event_outs
                .values()
                .any(|v| matches!(v, ScriptValue::Field(f) if f.has_changed()))
    }

    /// Whether `name` changed since it was last asked about. Consumes the
    /// flag, so an immediate second query reports false. Node values keep
    /// their buffered mutations for the caller to drain.
    pub fn has_changed(&mut self, name: &str) -> bool {
        let assigned = self.changed.remove(name);
        let Some(ScriptValue::Field(field)) = self.event_outs.get(name) else {
            return assigned;
        };
        if field.field_type().is_node() {
            return assigned || field.has_changed();
        }
        let edited = field.has_changed();
        field.consume_changed();
        assigned || edited
    }

    /// Property enumeration is always empty.
    pub fn ids(&self) -> Vec<SmolStr> {
        Vec::new()
    }

    /// Drop every value, including the script's own bindings.
    pub fn clear(&mut self) {
        self.fields.clear();
        self.event_outs.clear();
        self.event_out_names.clear();
        self.standard.clear();
        self.functions.clear();
        self.changed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::scripting::fields::FieldRef;

    #[test]
    fn test_lookup_order() {
        let mut ctx = ExecutionContext::new();
        ctx.put("TRUE", ScriptValue::Number(1.0));
        assert!(matches!(ctx.get("TRUE"), Some(ScriptValue::Bool(true))));

        ctx.put("helper", ScriptValue::Number(3.0));
        ctx.add_field("helper", ScriptValue::from("field"));
        assert!(matches!(ctx.get("helper"), Some(ScriptValue::String(_))));
        assert!(ctx.get("missing").is_none());
        assert!(ctx.ids().is_empty());
    }

    #[test]
    fn test_event_out_change_is_consumed_once() {
        let mut ctx = ExecutionContext::new();
        ctx.add_event_out("value", 4, ScriptValue::Number(0.0));
        assert!(!ctx.has_any_changed());
        ctx.put("value", ScriptValue::Number(6.0));
        assert!(ctx.has_any_changed());
        assert!(ctx.has_changed("value"));
        assert!(!ctx.has_changed("value"));
        assert_eq!(ctx.event_out_name(4), Some("value"));
    }

    #[test]
    fn test_in_place_edit_counts_as_change() {
        let mut ctx = ExecutionContext::new();
        let v = FieldRef::tuple(FieldType::SFVec3f, [0.0; 4]);
        ctx.add_event_out("pos", 0, ScriptValue::Field(v.clone()));
        v.set("x", &ScriptValue::Number(1.0)).unwrap();
        assert!(ctx.has_any_changed());
        assert!(ctx.has_changed("pos"));
        assert!(!ctx.has_changed("pos"));
        assert!(!v.has_changed());
    }

    #[test]
    fn test_field_writes_are_not_tracked() {
        let mut ctx = ExecutionContext::new();
        ctx.add_field("count", ScriptValue::Number(0.0));
        ctx.put("count", ScriptValue::Number(5.0));
        assert!(!ctx.has_any_changed());
        assert!(matches!(ctx.get("count"), Some(ScriptValue::Number(n)) if n == 5.0));
    }
}
