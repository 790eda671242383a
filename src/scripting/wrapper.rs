//! The event bridge for one Script node.
//!
//! A [`ScriptWrapper`] is driven by the host's event model, once per frame:
//!
//! 1. [`ScriptWrapper::set_timestamp`], then [`ScriptWrapper::prepare_events`]
//! 2. [`ScriptWrapper::queue_event`] for every changed input field
//! 3. [`ScriptWrapper::events_processed`]
//! 4. [`ScriptWrapper::send_events`] and, when it reports output,
//!    [`ScriptWrapper::update_event_outs`]
//!
//! Script faults are reported through the engine's [`ReportAdapter`] and never
//! returned to the caller.
//!
//! [`ReportAdapter`]: crate::report::ReportAdapter

use super::context::ExecutionContext;
use super::js_engine::{foreign_function, lookup_function, wrap_source, Bindings, EVAL_FILE};
use super::value::ScriptValue;
use super::{Result, ScriptError, NON_USE_FIELDS};
use crate::field::{AccessType, FieldData, FieldType};
use crate::node::NodeRef;
use crate::report::{location_from_stack, ScriptDiagnostic, Severity};
use rquickjs::context::EvalOptions;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Persistent, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperState {
    Uninitialized,
    Initialized,
    Shutdown,
}

impl WrapperState {
    pub fn as_str(self) -> &'static str {
        match self {
            WrapperState::Uninitialized => "uninitialized",
            WrapperState::Initialized => "initialized",
            WrapperState::Shutdown => "shut down",
        }
    }
}

impl fmt::Display for WrapperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ScriptWrapper {
    // Declared before `context`: JS handles must go before their context.
    /// Resolves names through the evaluated script's scope.
    lookup: Option<Persistent<Function<'static>>>,
    scope: Rc<RefCell<ExecutionContext>>,
    context: Context,
    bindings: Rc<Bindings>,
    source_name: String,
    source: String,
    state: WrapperState,
    script_node: Option<NodeRef>,
    event_out_names: Vec<SmolStr>,
    /// Node-valued fields and eventOuts, in declaration order.
    node_field_names: Vec<SmolStr>,
    /// Last value seen for each node-valued name, with its field index.
    node_fields: FxHashMap<SmolStr, (usize, ScriptValue)>,
    direct_output: bool,
    must_evaluate: bool,
    had_input_event: bool,
    timestamp: f64,
}

impl ScriptWrapper {
    pub(crate) fn new(
        context: Context,
        bindings: Rc<Bindings>,
        source_name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self> {
        let scope = Rc::new(RefCell::new(ExecutionContext::new()));
        let weak = Rc::downgrade(&scope);
        context
            .with(|ctx| bindings.install(&ctx, weak).catch(&ctx).map_err(|e| e.to_string()))
            .map_err(ScriptError::Evaluation)?;
        Ok(Self {
            lookup: None,
            scope,
            context,
            bindings,
            source_name: source_name.into(),
            source: source.into(),
            state: WrapperState::Uninitialized,
            script_node: None,
            event_out_names: Vec::new(),
            node_field_names: Vec::new(),
            node_fields: FxHashMap::default(),
            direct_output: false,
            must_evaluate: false,
            had_input_event: false,
            timestamp: 0.0,
        })
    }

    pub fn state(&self) -> WrapperState {
        self.state
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn direct_output(&self) -> bool {
        self.direct_output
    }

    /// Whether the host should deliver events to this script immediately
    /// rather than batching them.
    pub fn must_evaluate(&self) -> bool {
        self.must_evaluate
    }

    pub fn event_out_names(&self) -> &[SmolStr] {
        &self.event_out_names
    }

    /// The script's namespace, for hosts that need to inspect it.
    pub fn execution_context(&self) -> &Rc<RefCell<ExecutionContext>> {
        &self.scope
    }

    /// Bind the wrapper to its Script node, evaluate the source and run the
    /// script's `initialize` function.
    ///
    /// Script faults are reported, not returned. The only error is a field
    /// type the engine's profile cannot represent, or a second call.
    pub fn initialize(&mut self, node: NodeRef) -> Result<()> {
        if self.state != WrapperState::Uninitialized {
            return Err(ScriptError::InvalidState(self.state.as_str()));
        }
        let _span = tracing::debug_span!("initialize", script = %self.source_name).entered();

        self.direct_output = bool_field(&node, "directOutput");
        self.must_evaluate = bool_field(&node, "mustEvaluate");

        let mut event_ins = 0;
        for index in node.all_fields() {
            let Some(decl) = node.field_declaration(index) else {
                continue;
            };
            if NON_USE_FIELDS.contains(&decl.name.as_str()) {
                continue;
            }
            if decl.access == AccessType::EventIn {
                event_ins += 1;
                continue;
            }
            let value = self.initial_value(&node, index, decl.field_type, &decl.name)?;
            if let ScriptValue::Field(field) = &value {
                if !self.direct_output && decl.access != AccessType::EventOut {
                    field.set_read_only(true);
                    field.set_script_field(true);
                }
                if decl.field_type.is_node() {
                    field.set_owner(Some((node.clone(), index)));
                }
            }
            if decl.field_type.is_node() {
                self.node_field_names.push(decl.name.clone());
                self.node_fields
                    .insert(decl.name.clone(), (index, value.clone()));
            }
            let mut scope = self.scope.borrow_mut();
            if decl.access == AccessType::Field {
                scope.add_field(&decl.name, value);
            } else {
                scope.add_event_out(&decl.name, index, value);
                self.event_out_names.push(decl.name.clone());
            }
        }
        tracing::debug!(
            event_outs = self.event_out_names.len(),
            event_ins,
            direct_output = self.direct_output,
            "script fields registered"
        );

        self.script_node = Some(node);
        self.state = WrapperState::Initialized;
        self.lookup = self.evaluate();
        self.call("initialize", None);
        Ok(())
    }

    fn initial_value(
        &self,
        node: &NodeRef,
        index: usize,
        field_type: FieldType,
        name: &str,
    ) -> Result<ScriptValue> {
        let factory = self.bindings.factory();
        let data = match node.field_value(index) {
            Ok(data) => Some(data),
            Err(e) => {
                self.warn(&format!("Cannot read field {}: {}", name, e));
                None
            }
        };
        match factory.create(field_type, data.as_ref()) {
            Ok(value) => Ok(value),
            Err(e @ ScriptError::Configuration(_)) => Err(e),
            Err(e) => {
                self.warn(&format!("Invalid initial value for field {}: {}", name, e));
                factory.create(field_type, None)
            }
        }
    }

    /// Run the source, keeping the name lookup it hands back.
    fn evaluate(&self) -> Option<Persistent<Function<'static>>> {
        let code = wrap_source(&self.source);
        self.context.with(|ctx| {
            let mut options = EvalOptions::default();
            options.strict = false;
            match ctx.eval_with_options::<Function, _>(code, options).catch(&ctx) {
                Ok(lookup) => Some(Persistent::save(&ctx, lookup)),
                Err(e) => {
                    self.report_caught(&e, Severity::Error, "while evaluating script");
                    None
                }
            }
        })
    }

    /// Cache the simulation time passed to event handlers.
    pub fn set_timestamp(&mut self, time: f64) {
        self.timestamp = time;
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Run the script's `prepareEvents` hook. X3D scripts only; true when
    /// something ran.
    pub fn prepare_events(&mut self) -> bool {
        if self.state != WrapperState::Initialized || !self.bindings.profile().has_prepare_events() {
            return false;
        }
        self.call("prepareEvents", None).is_some()
    }

    /// Deliver one changed input field to the script.
    ///
    /// Host-owned fields and the script's own eventOuts are ignored, so a
    /// script never sees its output come back as input within a turn.
    pub fn queue_event(&mut self, field_type: FieldType, name: &str, value: &FieldData) {
        if self.state != WrapperState::Initialized {
            tracing::debug!(name, state = %self.state, "event dropped");
            return;
        }
        if NON_USE_FIELDS.contains(&name) || self.scope.borrow().is_event_out(name) {
            return;
        }
        let value = match self.bindings.factory().create(field_type, Some(value)) {
            Ok(value) => value,
            Err(e) => {
                self.warn(&format!("Invalid value for eventIn {}: {}", name, e));
                return;
            }
        };
        if self.call(name, Some(&value)) == Some(true) {
            self.had_input_event = true;
        }
    }

    /// Run `eventsProcessed` once after a frame's input events. Frames with no
    /// delivered events skip it.
    pub fn events_processed(&mut self) {
        if self.state != WrapperState::Initialized || !self.had_input_event {
            return;
        }
        self.had_input_event = false;
        self.call("eventsProcessed", None);
    }

    /// Whether any output changed this turn. With directOutput, also looks
    /// inside node-valued fields for edits made through a node reference.
    pub fn send_events(&mut self) -> bool {
        if self.state != WrapperState::Initialized {
            return false;
        }
        let scope = self.scope.borrow();
        let mut changed = scope.has_any_changed();
        if self.direct_output {
            for name in &self.node_field_names {
                let current = scope.get(name).unwrap_or_default();
                let nested = match self.node_fields.get(name) {
                    Some((_, known)) if !current.same(known) => true,
                    _ => current.as_field().is_some_and(|f| f.has_changed()),
                };
                changed |= nested;
            }
        }
        changed
    }

    /// Write every changed output back to the scene graph.
    ///
    /// Assigned or edited eventOuts go to the script node first; with
    /// directOutput, node-valued fields then forward edits made through
    /// them to the nodes they reference. Each change is written once.
    pub fn update_event_outs(&mut self) {
        if self.state != WrapperState::Initialized {
            return;
        }
        let Some(script_node) = self.script_node.clone() else {
            return;
        };
        let _span = tracing::debug_span!("update_event_outs", script = %self.source_name).entered();

        let mut handled = FxHashSet::default();
        for name in self.event_out_names.clone() {
            if !self.scope.borrow_mut().has_changed(&name) {
                continue;
            }
            handled.insert(name.clone());
            if self.node_fields.contains_key(&name) {
                self.send_node_output(&script_node, &name, true);
                continue;
            }
            let Some(index) = script_node.field_index(&name) else {
                continue;
            };
            let value = self.scope.borrow().get(&name).unwrap_or_default();
            self.send_event(&script_node, index, &value, &name);
        }

        if !self.direct_output {
            return;
        }
        for name in self.node_field_names.clone() {
            if !handled.contains(&name) {
                self.send_node_output(&script_node, &name, false);
            }
        }
    }

    /// Resolve one node-valued name: a rebound value is registered and sent
    /// whole, buffered edits are forwarded to their target nodes, and an
    /// assignment with no edits sends the current value once.
    fn send_node_output(&mut self, script_node: &NodeRef, name: &str, change_checked: bool) {
        let Some((index, known)) = self.node_fields.get(name).cloned() else {
            return;
        };
        let current = self.scope.borrow().get(name).unwrap_or_default();
        let rebound = !current.same(&known);
        if rebound {
            self.node_fields.insert(name.into(), (index, current.clone()));
        }
        let is_event_out = self.scope.borrow().is_event_out(name);
        let records = current
            .as_field()
            .map(|f| f.drain_changes())
            .unwrap_or_default();
        let mut send_whole = rebound || (change_checked && records.is_empty());
        let mut forward = Vec::with_capacity(records.len());
        for record in records {
            let (target, target_index) = record
                .target
                .unwrap_or_else(|| (script_node.clone(), index));
            if target.ptr_eq(script_node) && target_index == index {
                send_whole = true;
            } else {
                forward.push((target, target_index, record.value));
            }
        }
        // A plain field's own value is script state and never written back.
        if send_whole && is_event_out {
            self.send_event(script_node, index, &current, name);
        }
        for (target, target_index, value) in forward {
            self.send_event(&target, target_index, &value, name);
        }
    }

    /// Type-check `value` against the target field and write it. Failures
    /// are reported as warnings and leave the field unchanged.
    fn send_event(&self, node: &NodeRef, index: usize, value: &ScriptValue, origin: &str) {
        let Some(decl) = node.field_declaration(index) else {
            self.warn(&format!("Error processing output field {}: no field {}", origin, index));
            return;
        };
        let data = match self.bindings.factory().to_native(decl.field_type, value) {
            Ok(data) => data,
            Err(e) => {
                self.warn(&format!(
                    "Error processing output field {}: invalid value {} for {} {}.{}: {}",
                    origin,
                    value.type_name(),
                    decl.field_type,
                    node.node_name(),
                    decl.name,
                    e
                ));
                return;
            }
        };
        tracing::debug!(node = %node.node_name(), field = %decl.name, "output");
        if let Err(e) = node.set_value(index, data) {
            self.warn(&format!(
                "Error processing output field {}: {}.{}: {}",
                origin,
                node.node_name(),
                decl.name,
                e
            ));
        }
    }

    /// Run the script's `shutdown` function. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.state != WrapperState::Initialized {
            tracing::debug!(state = %self.state, "shutdown ignored");
            return;
        }
        self.call("shutdown", None);
        self.state = WrapperState::Shutdown;
    }

    /// Call a script function with `(value, timestamp)`, resolving `name`
    /// through the script's scope at call time. Engine globals and names
    /// bound at runtime are found the same way. `None` when there is no such
    /// function, otherwise whether it returned without throwing.
    fn call(&self, name: &str, value: Option<&ScriptValue>) -> Option<bool> {
        let local = self.scope.borrow().function(name);
        self.context.with(|ctx| {
            let func = self.resolve(&ctx, name, local.as_ref())?;
            let result = match value {
                Some(value) => match self.bindings.to_js(&ctx, value) {
                    Ok(arg) => func.call::<_, Value>((arg, self.timestamp)),
                    Err(e) => Err(e),
                },
                None => func.call::<_, Value>(()),
            };
            match result.catch(&ctx) {
                Ok(_) => Some(true),
                Err(e) => {
                    self.report_caught(&e, Severity::RuntimeError, &format!("in function {}", name));
                    Some(false)
                }
            }
        })
    }

    /// Without a lookup (the source failed to evaluate) only runtime
    /// bindings and engine globals are reachable.
    fn resolve<'js>(
        &self,
        ctx: &Ctx<'js>,
        name: &str,
        local: Option<&ScriptValue>,
    ) -> Option<Function<'js>> {
        if let Some(saved) = &self.lookup {
            let lookup = saved.clone().restore(ctx).ok()?;
            return lookup_function(ctx, &lookup, name);
        }
        if let Some(func) = local.and_then(|v| foreign_function(ctx, v)) {
            return Some(func);
        }
        ctx.globals()
            .get::<_, Value>(name)
            .ok()
            .and_then(Value::into_function)
    }

    fn report_caught(&self, error: &CaughtError<'_>, severity: Severity, during: &str) {
        let (message, location) = match error {
            CaughtError::Exception(ex) => (
                ex.message().unwrap_or_else(|| "Script exception".to_string()),
                ex.stack()
                    .and_then(|stack| location_from_stack(&stack, EVAL_FILE)),
            ),
            CaughtError::Value(value) => (format!("Script threw {:?}", value), None),
            CaughtError::Error(e) => (e.to_string(), None),
        };
        let diagnostic = ScriptDiagnostic::new(severity, format!("{} {}", message, during))
            .with_source(Some(&self.source_name))
            .with_location(location)
            .with_line_from(&self.source);
        self.bindings.reporter.report(diagnostic);
    }

    fn warn(&self, msg: &str) {
        self.bindings.reporter.warning(msg);
    }
}

impl Drop for ScriptWrapper {
    fn drop(&mut self) {
        // Saved JS values must be released while the runtime still exists.
        self.lookup = None;
        self.scope.borrow_mut().clear();
        self.node_fields.clear();
    }
}

impl fmt::Debug for ScriptWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptWrapper")
            .field("source_name", &self.source_name)
            .field("state", &self.state)
            .field("direct_output", &self.direct_output)
            .field("event_outs", &self.event_out_names)
            .finish()
    }
}

fn bool_field(node: &NodeRef, name: &str) -> bool {
    node.field_index(name)
        .and_then(|index| node.field_value(index).ok())
        .is_some_and(|data| data == FieldData::Bool(true))
}
