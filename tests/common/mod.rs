#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use vrml_script_bridge::field::{FieldData, FieldDeclaration, FieldError};
use vrml_script_bridge::scripting::{BrowserHost, DefaultBrowser, ScriptEngine, ScriptWrapper};
use vrml_script_bridge::{
    BasicNode, CollectingReporter, EngineConfig, ErrorReporter, NodeRef, Profile, ReportAdapter,
    VrmlNode,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Node that remembers every successful `set_value` call.
pub struct RecordingNode {
    node: BasicNode,
    pub writes: Vec<(usize, FieldData)>,
}

impl RecordingNode {
    pub fn index(&self, name: &str) -> usize {
        self.node.field_index(name).expect("declared field")
    }

    pub fn value(&self, name: &str) -> FieldData {
        self.node.value_by_name(name).cloned().expect("declared field")
    }

    pub fn writes_to(&self, name: &str) -> Vec<FieldData> {
        let index = self.index(name);
        self.writes
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl VrmlNode for RecordingNode {
    fn node_name(&self) -> &str {
        self.node.node_name()
    }

    fn def_name(&self) -> Option<&str> {
        self.node.def_name()
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.node.field_index(name)
    }

    fn field_declaration(&self, index: usize) -> Option<&FieldDeclaration> {
        self.node.field_declaration(index)
    }

    fn all_fields(&self) -> Vec<usize> {
        self.node.all_fields()
    }

    fn field_value(&self, index: usize) -> Result<FieldData, FieldError> {
        self.node.field_value(index)
    }

    fn set_value(&mut self, index: usize, value: FieldData) -> Result<(), FieldError> {
        self.node.set_value(index, value.clone())?;
        self.writes.push((index, value));
        Ok(())
    }
}

pub fn recording(node: BasicNode) -> (Rc<RefCell<RecordingNode>>, NodeRef) {
    let rec = Rc::new(RefCell::new(RecordingNode {
        node,
        writes: Vec::new(),
    }));
    let node_ref = NodeRef::from_rc(rec.clone());
    (rec, node_ref)
}

pub struct Harness {
    pub engine: ScriptEngine,
    pub sink: Rc<CollectingReporter>,
}

impl Harness {
    pub fn new(profile: Profile) -> Self {
        Self::with_browser(profile, Rc::new(DefaultBrowser::new()))
    }

    pub fn with_browser(profile: Profile, browser: Rc<dyn BrowserHost>) -> Self {
        init_tracing();
        let config = EngineConfig {
            keep_diagnostics: true,
            ..EngineConfig::for_profile(profile)
        };
        let reporter = Rc::new(ReportAdapter::new().with_history());
        let engine = ScriptEngine::with_host(config, reporter, browser).expect("engine");
        let sink = Rc::new(CollectingReporter::new());
        let upstream: Rc<dyn ErrorReporter> = sink.clone();
        engine.set_error_reporter(Some(upstream));
        Self { engine, sink }
    }

    /// Create and initialize a wrapper for `source` on `node`.
    pub fn load(&self, source: &str, node: &NodeRef) -> ScriptWrapper {
        let mut wrapper = self
            .engine
            .create_wrapper("test.js", source)
            .expect("wrapper");
        wrapper.initialize(node.clone()).expect("initialize");
        wrapper
    }

    /// One frame's output harvest.
    pub fn flush(wrapper: &mut ScriptWrapper) -> bool {
        let changed = wrapper.send_events();
        if changed {
            wrapper.update_event_outs();
        }
        changed
    }
}

/// A Transform-like node to point SFNode fields at.
pub fn transform() -> BasicNode {
    use vrml_script_bridge::{AccessType, FieldType};
    BasicNode::new("Transform")
        .with_field("translation", AccessType::ExposedField, FieldType::SFVec3f, None)
        .with_field("rotation", AccessType::ExposedField, FieldType::SFRotation, None)
        .with_field("children", AccessType::ExposedField, FieldType::MFNode, None)
        .with_field("bboxSize", AccessType::Field, FieldType::SFVec3f, None)
}
