//! Scene-graph node abstraction consumed by the scripting bridge.

use crate::field::{AccessType, FieldData, FieldDeclaration, FieldError, FieldType};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// The field-level interface a scene-graph node offers the bridge.
///
/// `set_value` is the node's indexed field-set operation; whatever routing it
/// triggers downstream is the node's business.
pub trait VrmlNode {
    /// Node type name, e.g. `Transform`.
    fn node_name(&self) -> &str;

    /// The name the node was DEF'd under, if any.
    fn def_name(&self) -> Option<&str> {
        None
    }

    fn field_index(&self, name: &str) -> Option<usize>;

    fn field_declaration(&self, index: usize) -> Option<&FieldDeclaration>;

    /// Indices of every declared field, in declaration order.
    fn all_fields(&self) -> Vec<usize>;

    fn field_value(&self, index: usize) -> Result<FieldData, FieldError>;

    fn set_value(&mut self, index: usize, value: FieldData) -> Result<(), FieldError>;

    /// Whether the node has finished construction. Until then plain
    /// `field` values may still be assigned.
    fn is_setup_finished(&self) -> bool {
        true
    }
}

/// Shared, identity-compared handle to a scene-graph node.
#[derive(Clone)]
pub struct NodeRef(Rc<RefCell<dyn VrmlNode>>);

impl NodeRef {
    pub fn new<N: VrmlNode + 'static>(node: N) -> Self {
        Self(Rc::new(RefCell::new(node)))
    }

    /// Wrap a node the caller keeps a typed handle to.
    pub fn from_rc<N: VrmlNode + 'static>(node: Rc<RefCell<N>>) -> Self {
        Self(node)
    }

    pub fn borrow(&self) -> Ref<'_, dyn VrmlNode> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, dyn VrmlNode> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }

    pub fn node_name(&self) -> String {
        self.0.borrow().node_name().to_string()
    }

    pub fn def_name(&self) -> Option<String> {
        self.0.borrow().def_name().map(str::to_string)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.0.borrow().field_index(name)
    }

    pub fn field_declaration(&self, index: usize) -> Option<FieldDeclaration> {
        self.0.borrow().field_declaration(index).cloned()
    }

    /// Look a field up by name, returning its index and declaration.
    pub fn declaration_by_name(&self, name: &str) -> Option<(usize, FieldDeclaration)> {
        let node = self.0.borrow();
        let index = node.field_index(name)?;
        node.field_declaration(index).map(|d| (index, d.clone()))
    }

    pub fn field_value(&self, index: usize) -> Result<FieldData, FieldError> {
        self.0.borrow().field_value(index)
    }

    pub fn all_fields(&self) -> Vec<usize> {
        self.0.borrow().all_fields()
    }

    pub fn set_value(&self, index: usize, value: FieldData) -> Result<(), FieldError> {
        self.0.borrow_mut().set_value(index, value)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(node) => write!(f, "NodeRef({} @ {:p})", node.node_name(), Rc::as_ptr(&self.0)),
            Err(_) => write!(f, "NodeRef(<borrowed> @ {:p})", Rc::as_ptr(&self.0)),
        }
    }
}

/// In-memory node with a fixed field list. Handy for hosts without their
/// own node storage and for building Script nodes.
#[derive(Debug, Clone)]
pub struct BasicNode {
    name: SmolStr,
    def_name: Option<SmolStr>,
    fields: Vec<FieldDeclaration>,
    values: Vec<FieldData>,
    index: FxHashMap<SmolStr, usize>,
    setup_finished: bool,
}

impl BasicNode {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            def_name: None,
            fields: Vec::new(),
            values: Vec::new(),
            index: FxHashMap::default(),
            setup_finished: true,
        }
    }

    /// A Script node carrying the `url`, `directOutput` and `mustEvaluate`
    /// fields every script declares.
    pub fn script(direct_output: bool) -> Self {
        Self::new("Script")
            .with_field("url", AccessType::ExposedField, FieldType::MFString, None)
            .with_field(
                "directOutput",
                AccessType::Field,
                FieldType::SFBool,
                Some(FieldData::Bool(direct_output)),
            )
            .with_field(
                "mustEvaluate",
                AccessType::Field,
                FieldType::SFBool,
                Some(FieldData::Bool(false)),
            )
    }

    /// Add a field, using the type's zero value when `value` is `None`.
    /// Re-declaring a name replaces the earlier declaration.
    pub fn with_field(
        mut self,
        name: impl Into<SmolStr>,
        access: AccessType,
        field_type: FieldType,
        value: Option<FieldData>,
    ) -> Self {
        let decl = FieldDeclaration::new(name, access, field_type);
        let value = value.unwrap_or_else(|| FieldData::default_for(field_type));
        match self.index.get(&decl.name) {
            Some(&i) => {
                self.fields[i] = decl;
                self.values[i] = value;
            }
            None => {
                self.index.insert(decl.name.clone(), self.fields.len());
                self.fields.push(decl);
                self.values.push(value);
            }
        }
        self
    }

    pub fn with_def_name(mut self, def_name: impl Into<SmolStr>) -> Self {
        self.def_name = Some(def_name.into());
        self
    }

    /// Mark the node as still under construction.
    pub fn unfinished(mut self) -> Self {
        self.setup_finished = false;
        self
    }

    pub fn finish_setup(&mut self) {
        self.setup_finished = true;
    }

    pub fn value_by_name(&self, name: &str) -> Option<&FieldData> {
        self.index.get(name).map(|&i| &self.values[i])
    }

    pub fn into_ref(self) -> NodeRef {
        NodeRef::new(self)
    }
}

impl VrmlNode for BasicNode {
    fn node_name(&self) -> &str {
        &self.name
    }

    fn def_name(&self) -> Option<&str> {
        self.def_name.as_deref()
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn field_declaration(&self, index: usize) -> Option<&FieldDeclaration> {
        self.fields.get(index)
    }

    fn all_fields(&self) -> Vec<usize> {
        (0..self.fields.len()).collect()
    }

    fn field_value(&self, index: usize) -> Result<FieldData, FieldError> {
        self.values
            .get(index)
            .cloned()
            .ok_or(FieldError::InvalidIndex(index))
    }

    fn set_value(&mut self, index: usize, value: FieldData) -> Result<(), FieldError> {
        let decl = self
            .fields
            .get(index)
            .ok_or(FieldError::InvalidIndex(index))?;
        if decl.access == AccessType::Field && self.setup_finished {
            return Err(FieldError::NotWritable(decl.name.to_string()));
        }
        value.check_shape(decl.field_type)?;
        self.values[index] = value;
        Ok(())
    }

    fn is_setup_finished(&self) -> bool {
        self.setup_finished
    }
}
