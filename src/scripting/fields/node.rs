use super::{FieldRef, FieldValue, FieldValueError};
use crate::field::AccessType;
use crate::node::NodeRef;
use crate::scripting::factory;
use crate::scripting::value::ScriptValue;
use smol_str::SmolStr;

/// One buffered field write: set `value` on `target`'s field. With no target
/// the write goes to the script node's own field the value was read from.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub target: Option<(NodeRef, usize)>,
    pub value: ScriptValue,
}

/// A node reference as held by an `SFNode` field object.
#[derive(Debug, Clone)]
pub struct NodeValue {
    node: NodeRef,
    /// Field values handed out or written through this reference, in first
    /// access order.
    children: Vec<(SmolStr, usize, ScriptValue)>,
    /// Writes not yet drained, oldest first.
    pending: Vec<MutationRecord>,
}

impl NodeValue {
    pub fn new(node: NodeRef) -> Self {
        Self {
            node,
            children: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn node_name(&self) -> String {
        self.node.node_name()
    }

    fn cached(&self, name: &str) -> Option<ScriptValue> {
        self.children
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, _, v)| v.clone())
    }

    fn cache(&mut self, name: &str, index: usize, value: ScriptValue) {
        match self.children.iter_mut().find(|(n, _, _)| n == name) {
            Some(slot) => slot.2 = value,
            None => self.children.push((name.into(), index, value)),
        }
    }
}

impl FieldRef {
    fn with_node<R>(&self, f: impl FnOnce(&mut NodeValue) -> R) -> Option<R> {
        match &mut self.0.borrow_mut().value {
            FieldValue::Node(nv) => Some(f(nv)),
            _ => None,
        }
    }

    /// Read a field of the referenced node. Only eventOut and exposedField
    /// values are visible; field objects are created once and cached so
    /// in-place edits are tracked.
    pub(super) fn node_get(&self, key: &str) -> Result<ScriptValue, FieldValueError> {
        let Some(node) = self.node_ref() else {
            return Ok(ScriptValue::Undefined);
        };
        let Some((index, decl)) = node.declaration_by_name(key) else {
            return Ok(ScriptValue::Undefined);
        };
        if !decl.access.is_readable() {
            return Err(FieldValueError::NotReadable(key.to_string()));
        }
        if let Some(value) = self.with_node(|nv| nv.cached(key)).flatten() {
            return Ok(value);
        }
        let data = node.field_value(index)?;
        let value = factory::to_script_value(decl.field_type, &data)?;
        if let ScriptValue::Field(child) = &value {
            child.set_read_only(self.is_read_only());
            if decl.field_type.is_node() {
                child.set_owner(Some((node.clone(), index)));
            }
            self.with_node(|nv| nv.cache(key, index, value.clone()));
        }
        Ok(value)
    }

    /// Buffer a write to a field of the referenced node. The value is type
    /// checked now and delivered when the mutations are drained.
    pub(super) fn node_set(&self, key: &str, value: &ScriptValue) -> Result<(), FieldValueError> {
        let Some(node) = self.node_ref() else {
            return Ok(());
        };
        let (index, decl) = node
            .declaration_by_name(key)
            .ok_or_else(|| FieldValueError::UnknownField(key.to_string()))?;
        let writable = match decl.access {
            AccessType::EventOut => false,
            AccessType::Field => !node.borrow().is_setup_finished(),
            AccessType::EventIn | AccessType::ExposedField => true,
        };
        if !writable {
            return Err(FieldValueError::NotWritable(key.to_string()));
        }
        factory::to_native_value(decl.field_type, value)?;
        self.with_node(|nv| {
            nv.cache(key, index, value.clone());
            nv.pending.push(MutationRecord {
                target: Some((nv.node.clone(), index)),
                value: value.clone(),
            });
        });
        Ok(())
    }

    /// Move in-place edits of handed-out child values into the pending log.
    /// True when anything is pending here or in a nested node value.
    pub(super) fn node_collect(&self) -> bool {
        let Some((node, children)) = self.with_node(|nv| (nv.node.clone(), nv.children.clone()))
        else {
            return false;
        };
        let mut records = Vec::new();
        let mut nested = false;
        for (_, index, child) in &children {
            let ScriptValue::Field(field) = child else {
                continue;
            };
            if field.field_type().is_node() {
                nested |= field.has_changed();
            } else if field.has_changed() {
                field.consume_changed();
                records.push(MutationRecord {
                    target: Some((node.clone(), *index)),
                    value: child.clone(),
                });
            }
        }
        self.with_node(|nv| {
            nv.pending.extend(records);
            !nv.pending.is_empty()
        })
        .unwrap_or(false)
            || nested
    }

    /// Take the pending log plus everything nested node values buffered.
    pub(super) fn node_drain(&self) -> Vec<MutationRecord> {
        self.node_collect();
        let Some((mut records, nested)) = self.with_node(|nv| {
            let records = std::mem::take(&mut nv.pending);
            // Primitive writes now live in the node; read them back from there.
            nv.children
                .retain(|(_, _, v)| matches!(v, ScriptValue::Field(_)));
            let nested: Vec<FieldRef> = nv
                .children
                .iter()
                .filter_map(|(_, _, v)| v.as_field())
                .filter(|f| f.field_type().is_node())
                .cloned()
                .collect();
            (records, nested)
        }) else {
            return Vec::new();
        };
        for child in nested {
            records.extend(child.drain_changes());
        }
        records
    }
}
