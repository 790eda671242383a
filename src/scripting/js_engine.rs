//! QuickJS binding: field objects as JS proxies, the script scope and the
//! `Browser` object.

use super::browser::{BrowserError, BrowserHost};
use super::context::ExecutionContext;
use super::factory::FieldFactory;
use super::fields::{FieldRef, FieldValueError};
use super::value::{ForeignValue, ScriptValue};
use crate::config::Profile;
use crate::field::FieldType;
use crate::node::NodeRef;
use crate::report::ReportAdapter;
use rquickjs::{
    class::Trace, function::Rest, Class, Ctx, Exception, Function, IntoJs, JsLifetime, Object,
    Persistent, Result as JsResult, Value,
};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

const PRELUDE: &str = include_str!("prelude.js");

/// File name QuickJS gives evaluated source in stack traces.
pub(crate) const EVAL_FILE: &str = "eval_script";

type ScopeRef = Weak<RefCell<ExecutionContext>>;

#[rquickjs::class]
pub struct JsField {
    field: FieldRef,
    bindings: Rc<Bindings>,
}

// FieldRef holds no JS values, so tracing is a no-op.
impl<'js> Trace<'js> for JsField {
    fn trace<'a>(&self, _tracer: rquickjs::class::Tracer<'a, 'js>) {}
}

unsafe impl<'js> JsLifetime<'js> for JsField {
    type Changed<'to> = JsField;
}

#[rquickjs::methods]
impl JsField {
    pub fn get_prop<'js>(&self, ctx: Ctx<'js>, key: String) -> JsResult<Value<'js>> {
        match self.field.get(&key) {
            Ok(value) => self.bindings.to_js(&ctx, &value),
            Err(e) => Err(Exception::throw_type(&ctx, &e.to_string())),
        }
    }

    /// Rejected writes are reported and leave the value untouched.
    pub fn set_prop<'js>(&self, ctx: Ctx<'js>, key: String, value: Value<'js>) -> JsResult<bool> {
        let value = self.bindings.from_js(&ctx, value)?;
        match self.field.set(&key, &value) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.bindings.reporter.warning(&format!(
                    "Cannot set {} property {}: {}",
                    self.field.field_type(),
                    key,
                    e
                ));
                Ok(false)
            }
        }
    }

    pub fn is_method(&self, name: String) -> bool {
        self.field.is_method(&name)
    }

    pub fn invoke<'js>(
        &self,
        ctx: Ctx<'js>,
        name: String,
        args: Rest<Value<'js>>,
    ) -> JsResult<Value<'js>> {
        let args = args
            .0
            .into_iter()
            .map(|arg| self.bindings.from_js(&ctx, arg))
            .collect::<JsResult<Vec<_>>>()?;
        match self.field.invoke(&name, &args) {
            Ok(value) => self.bindings.to_js(&ctx, &value),
            Err(e @ (FieldValueError::ReadOnly(_) | FieldValueError::OutOfRange { .. })) => {
                self.bindings
                    .reporter
                    .warning(&format!("{}.{}: {}", self.field.field_type(), name, e));
                Ok(Value::new_undefined(ctx))
            }
            Err(e) => Err(Exception::throw_type(&ctx, &e.to_string())),
        }
    }
}

fn make_js_err(msg: &str) -> rquickjs::Error {
    rquickjs::Error::IntoJs {
        from: "Rust",
        to: "JS",
        message: Some(msg.to_string()),
    }
}

fn browser_err(ctx: &Ctx<'_>, e: BrowserError) -> rquickjs::Error {
    Exception::throw_message(ctx, &e.to_string())
}

/// Engine-wide state every script context is built from. Created once per
/// engine and shared read-only by all of its scripts.
pub struct Bindings {
    factory: FieldFactory,
    pub(crate) reporter: Rc<ReportAdapter>,
    browser: Rc<dyn BrowserHost>,
    script_output: bool,
    constructors: String,
}

impl Bindings {
    pub fn new(
        factory: FieldFactory,
        reporter: Rc<ReportAdapter>,
        browser: Rc<dyn BrowserHost>,
        script_output: bool,
    ) -> Self {
        let constructors = factory
            .constructible_types()
            .iter()
            .map(|ft| {
                format!(
                    "globalThis.{0} = function {0}(...args) {{ return __vrml_construct(\"{0}\", ...args); }};\n",
                    ft.name()
                )
            })
            .collect();
        Self {
            factory,
            reporter,
            browser,
            script_output,
            constructors,
        }
    }

    pub fn factory(&self) -> &FieldFactory {
        &self.factory
    }

    pub fn profile(&self) -> Profile {
        self.factory.profile()
    }

    fn print(&self, msg: &str) {
        if self.script_output {
            self.reporter.message(msg);
        }
    }

    /// Set up a fresh context for one script: prelude, field constructors,
    /// the `Browser` object and the scope proxy over `scope`.
    pub(crate) fn install<'js>(self: &Rc<Self>, ctx: &Ctx<'js>, scope: ScopeRef) -> JsResult<()> {
        let globals = ctx.globals();

        let bindings = self.clone();
        globals.set(
            "__vrml_print",
            Function::new(ctx.clone(), move |msg: String| bindings.print(&msg))?,
        )?;
        let bindings = self.clone();
        globals.set(
            "__vrml_construct",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, name: String, args: Rest<Value<'js>>| {
                    bindings.construct(&ctx, &name, args.0)
                },
            )?,
        )?;
        ctx.eval::<(), _>(PRELUDE)?;
        ctx.eval::<(), _>(self.constructors.as_str())?;

        let browser = self.browser_object(ctx)?;
        if let Some(scope) = scope.upgrade() {
            let saved = Persistent::save(ctx, browser.into_value());
            scope
                .borrow_mut()
                .set_standard("Browser", ScriptValue::Foreign(ForeignValue::new(saved)));
        }

        let host = Object::new(ctx.clone())?;
        let s = scope.clone();
        host.set(
            "has",
            Function::new(ctx.clone(), move |name: String| {
                s.upgrade().is_some_and(|c| {
                    let found = c.borrow().has(&name);
                    found
                })
            })?,
        )?;
        let (s, bindings) = (scope.clone(), self.clone());
        host.set(
            "get",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, name: String| -> JsResult<Value<'js>> {
                    let value = read_scope(&s, &name).unwrap_or_default();
                    bindings.to_js(&ctx, &value)
                },
            )?,
        )?;
        let (s, bindings) = (scope, self.clone());
        host.set(
            "set",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, name: String, value: Value<'js>| -> JsResult<()> {
                    let value = bindings.from_js(&ctx, value)?;
                    if let Some(c) = s.upgrade() {
                        c.borrow_mut().put(&name, value);
                    }
                    Ok(())
                },
            )?,
        )?;
        let make_scope: Function = globals.get("__vrml_scope_for")?;
        let scope_proxy: Value = make_scope.call((host,))?;
        globals.set("__vrml_scope", scope_proxy)?;
        Ok(())
    }

    fn construct<'js>(
        self: &Rc<Self>,
        ctx: &Ctx<'js>,
        name: &str,
        args: Vec<Value<'js>>,
    ) -> JsResult<Value<'js>> {
        let field_type = FieldType::from_name(name).map_err(|e| make_js_err(&e.to_string()))?;
        let args = args
            .into_iter()
            .map(|arg| self.from_js(ctx, arg))
            .collect::<JsResult<Vec<_>>>()?;
        let field = if field_type == FieldType::SFNode {
            let source = match args.first() {
                Some(ScriptValue::String(s)) => s.clone(),
                _ => return Err(Exception::throw_type(ctx, "SFNode expects scene text")),
            };
            let nodes = self
                .browser
                .create_vrml_from_string(&source)
                .map_err(|e| browser_err(ctx, e))?;
            match nodes.into_iter().next() {
                Some(node) => FieldRef::node(node),
                None => return Err(Exception::throw_type(ctx, "SFNode text holds no node")),
            }
        } else {
            self.factory
                .construct(field_type, &args)
                .map_err(|e| Exception::throw_type(ctx, &e.to_string()))?
        };
        self.to_js(ctx, &ScriptValue::Field(field))
    }

    fn browser_object<'js>(self: &Rc<Self>, ctx: &Ctx<'js>) -> JsResult<Object<'js>> {
        let obj = Object::new(ctx.clone())?;
        let host = &self.browser;

        let b = host.clone();
        obj.set("getName", Function::new(ctx.clone(), move || b.name())?)?;
        let b = host.clone();
        obj.set("getVersion", Function::new(ctx.clone(), move || b.version())?)?;
        let b = host.clone();
        obj.set(
            "getCurrentSpeed",
            Function::new(ctx.clone(), move || b.current_speed())?,
        )?;
        let b = host.clone();
        obj.set(
            "getCurrentFrameRate",
            Function::new(ctx.clone(), move || b.current_frame_rate())?,
        )?;
        let b = host.clone();
        obj.set("getWorldURL", Function::new(ctx.clone(), move || b.world_url())?)?;
        let b = host.clone();
        obj.set(
            "getDescription",
            Function::new(ctx.clone(), move || b.description())?,
        )?;
        let b = host.clone();
        obj.set(
            "setDescription",
            Function::new(ctx.clone(), move |text: String| b.set_description(&text))?,
        )?;

        self.scene_text_function(ctx, &obj, "createVrmlFromString", |b, text| {
            b.create_vrml_from_string(text)
        })?;
        let bindings = self.clone();
        obj.set(
            "replaceWorld",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, nodes: Value<'js>| -> JsResult<()> {
                    let nodes = bindings.nodes_arg(&ctx, nodes)?;
                    bindings
                        .browser
                        .replace_world(nodes)
                        .map_err(|e| browser_err(&ctx, e))
                },
            )?,
        )?;
        let bindings = self.clone();
        obj.set(
            "loadURL",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, url: Value<'js>, parameter: Value<'js>| -> JsResult<()> {
                    let url = bindings.strings_arg(&ctx, url)?;
                    let parameter = bindings.strings_arg(&ctx, parameter)?;
                    bindings
                        .browser
                        .load_url(&url, &parameter)
                        .map_err(|e| browser_err(&ctx, e))
                },
            )?,
        )?;
        self.route_functions(ctx, &obj)?;
        for method in ["print", "println"] {
            let bindings = self.clone();
            obj.set(
                method,
                Function::new(ctx.clone(), move |args: Rest<String>| {
                    bindings.print(&args.0.join(" "))
                })?,
            )?;
        }

        if self.profile() == Profile::X3d {
            let b = host.clone();
            obj.set("nextViewpoint", Function::new(ctx.clone(), move || b.next_viewpoint())?)?;
            let b = host.clone();
            obj.set(
                "previousViewpoint",
                Function::new(ctx.clone(), move || b.previous_viewpoint())?,
            )?;
            let b = host.clone();
            obj.set("firstViewpoint", Function::new(ctx.clone(), move || b.first_viewpoint())?)?;
            let b = host.clone();
            obj.set("lastViewpoint", Function::new(ctx.clone(), move || b.last_viewpoint())?)?;
            self.scene_text_function(ctx, &obj, "createX3DFromString", |b, text| {
                b.create_x3d_from_string(text)
            })?;
            let bindings = self.clone();
            obj.set(
                "getSupportedProfiles",
                Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> JsResult<Value<'js>> {
                    bindings.string_list(&ctx, bindings.browser.supported_profiles())
                })?,
            )?;
            let bindings = self.clone();
            obj.set(
                "getSupportedComponents",
                Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> JsResult<Value<'js>> {
                    bindings.string_list(&ctx, bindings.browser.supported_components())
                })?,
            )?;
            obj.set("currentScene", self.scene_object(ctx)?)?;
            let add_properties: Function = ctx.globals().get("__vrml_browser_properties")?;
            add_properties.call::<_, ()>((obj.clone(),))?;
        }
        Ok(obj)
    }

    /// A function parsing scene text through `parse` and returning the nodes
    /// as an MFNode.
    fn scene_text_function<'js>(
        self: &Rc<Self>,
        ctx: &Ctx<'js>,
        obj: &Object<'js>,
        method: &str,
        parse: fn(&dyn BrowserHost, &str) -> Result<Vec<NodeRef>, BrowserError>,
    ) -> JsResult<()> {
        let bindings = self.clone();
        obj.set(
            method,
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, source: String| -> JsResult<Value<'js>> {
                    let nodes = parse(bindings.browser.as_ref(), &source)
                        .map_err(|e| browser_err(&ctx, e))?;
                    let items = nodes
                        .into_iter()
                        .map(|n| ScriptValue::Field(FieldRef::node(n)))
                        .collect();
                    bindings.to_js(&ctx, &ScriptValue::Field(FieldRef::list(FieldType::MFNode, items)))
                },
            )?,
        )
    }

    fn route_functions<'js>(self: &Rc<Self>, ctx: &Ctx<'js>, obj: &Object<'js>) -> JsResult<()> {
        for (method, add) in [("addRoute", true), ("deleteRoute", false)] {
            let bindings = self.clone();
            obj.set(
                method,
                Function::new(
                    ctx.clone(),
                    move |ctx: Ctx<'js>,
                          from: Value<'js>,
                          from_field: String,
                          to: Value<'js>,
                          to_field: String|
                          -> JsResult<()> {
                        let from = bindings.node_arg(&ctx, from)?;
                        let to = bindings.node_arg(&ctx, to)?;
                        let result = if add {
                            bindings.browser.add_route(&from, &from_field, &to, &to_field)
                        } else {
                            bindings.browser.delete_route(&from, &from_field, &to, &to_field)
                        };
                        result.map_err(|e| browser_err(&ctx, e))
                    },
                )?,
            )?;
        }
        Ok(())
    }

    /// `Browser.currentScene`: node creation, DEF name lookup and routing
    /// for the scene the script lives in.
    fn scene_object<'js>(self: &Rc<Self>, ctx: &Ctx<'js>) -> JsResult<Object<'js>> {
        let scene = Object::new(ctx.clone())?;
        let bindings = self.clone();
        scene.set(
            "createNode",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, type_name: String| -> JsResult<Value<'js>> {
                    let node = bindings
                        .browser
                        .create_node(&type_name)
                        .map_err(|e| browser_err(&ctx, e))?;
                    bindings.to_js(&ctx, &ScriptValue::Field(FieldRef::node(node)))
                },
            )?,
        )?;
        let bindings = self.clone();
        scene.set(
            "getNamedNode",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, name: String| -> JsResult<Value<'js>> {
                    let node = bindings
                        .browser
                        .named_node(&name)
                        .map_err(|e| browser_err(&ctx, e))?;
                    match node {
                        Some(node) => bindings.to_js(&ctx, &ScriptValue::Field(FieldRef::node(node))),
                        None => Ok(Value::new_null(ctx.clone())),
                    }
                },
            )?,
        )?;
        let bindings = self.clone();
        scene.set(
            "updateNamedNode",
            Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, name: String, node: Value<'js>| -> JsResult<()> {
                    let node = bindings.node_arg(&ctx, node)?;
                    bindings
                        .browser
                        .update_named_node(&name, &node)
                        .map_err(|e| browser_err(&ctx, e))
                },
            )?,
        )?;
        let bindings = self.clone();
        scene.set(
            "removeNamedNode",
            Function::new(ctx.clone(), move |ctx: Ctx<'js>, name: String| -> JsResult<()> {
                bindings
                    .browser
                    .remove_named_node(&name)
                    .map_err(|e| browser_err(&ctx, e))
            })?,
        )?;
        self.route_functions(ctx, &scene)?;
        Ok(scene)
    }

    fn string_list<'js>(self: &Rc<Self>, ctx: &Ctx<'js>, items: Vec<String>) -> JsResult<Value<'js>> {
        let items = items.into_iter().map(ScriptValue::String).collect();
        self.to_js(ctx, &ScriptValue::Field(FieldRef::list(FieldType::MFString, items)))
    }

    fn node_arg<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>) -> JsResult<NodeRef> {
        match self.from_js(ctx, value)? {
            ScriptValue::Field(f) => f
                .node_ref()
                .ok_or_else(|| Exception::throw_type(ctx, "Expected an SFNode")),
            _ => Err(Exception::throw_type(ctx, "Expected an SFNode")),
        }
    }

    fn nodes_arg<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>) -> JsResult<Vec<NodeRef>> {
        let items = match self.from_js(ctx, value)? {
            ScriptValue::Field(f) if f.field_type() == FieldType::MFNode => {
                f.elements().unwrap_or_default()
            }
            ScriptValue::Field(f) if f.field_type() == FieldType::SFNode => {
                vec![ScriptValue::Field(f)]
            }
            _ => return Err(Exception::throw_type(ctx, "Expected an MFNode")),
        };
        Ok(items
            .iter()
            .filter_map(|v| v.as_field().and_then(FieldRef::node_ref))
            .collect())
    }

    fn strings_arg<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>) -> JsResult<Vec<String>> {
        match self.from_js(ctx, value)? {
            ScriptValue::String(s) => Ok(vec![s]),
            ScriptValue::Undefined | ScriptValue::Null => Ok(Vec::new()),
            ScriptValue::Field(f) if f.field_type() == FieldType::MFString => Ok(f
                .elements()
                .unwrap_or_default()
                .iter()
                .map(ToString::to_string)
                .collect()),
            _ => Err(Exception::throw_type(ctx, "Expected an MFString")),
        }
    }

    /// Script value to JS. Field objects become proxies over a [`JsField`].
    pub(crate) fn to_js<'js>(self: &Rc<Self>, ctx: &Ctx<'js>, value: &ScriptValue) -> JsResult<Value<'js>> {
        match value {
            ScriptValue::Undefined => Ok(Value::new_undefined(ctx.clone())),
            ScriptValue::Null => Ok(Value::new_null(ctx.clone())),
            ScriptValue::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
            ScriptValue::Number(n) => Ok(Value::new_number(ctx.clone(), *n)),
            ScriptValue::String(s) => s.as_str().into_js(ctx),
            ScriptValue::Field(field) => {
                let instance = Class::instance(
                    ctx.clone(),
                    JsField {
                        field: field.clone(),
                        bindings: self.clone(),
                    },
                )?;
                let wrap: Function = ctx.globals().get("__vrml_wrap")?;
                wrap.call((instance,))
            }
            ScriptValue::Foreign(foreign) => match foreign.downcast_ref::<Persistent<Value<'static>>>() {
                Some(saved) => saved.clone().restore(ctx),
                None => Ok(Value::new_undefined(ctx.clone())),
            },
        }
    }

    /// JS value to script value. Anything the bridge does not interpret is
    /// kept alive as a [`ForeignValue`].
    pub(crate) fn from_js<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>) -> JsResult<ScriptValue> {
        if value.is_undefined() {
            return Ok(ScriptValue::Undefined);
        }
        if value.is_null() {
            return Ok(ScriptValue::Null);
        }
        if let Some(b) = value.as_bool() {
            return Ok(ScriptValue::Bool(b));
        }
        if let Some(n) = value.as_number() {
            return Ok(ScriptValue::Number(n));
        }
        if let Some(s) = value.as_string() {
            return Ok(ScriptValue::String(s.to_string()?));
        }
        if let Some(field) = field_of(ctx, &value) {
            return Ok(ScriptValue::Field(field));
        }
        Ok(foreign(ctx, value))
    }
}

pub(crate) fn foreign<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> ScriptValue {
    ScriptValue::Foreign(ForeignValue::new(Persistent::save(ctx, value)))
}

/// Restore a JS function kept as a foreign value.
pub(crate) fn foreign_function<'js>(ctx: &Ctx<'js>, value: &ScriptValue) -> Option<Function<'js>> {
    let ScriptValue::Foreign(foreign) = value else {
        return None;
    };
    let saved = foreign.downcast_ref::<Persistent<Value<'static>>>()?;
    saved.clone().restore(ctx).ok()?.into_function()
}

fn field_of<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<FieldRef> {
    let obj = value.as_object()?;
    let target = match obj.get::<_, Value>("__vrml_field") {
        Ok(target) if !target.is_undefined() => target,
        Ok(_) => value.clone(),
        Err(_) => {
            // A throwing getter on some unrelated object.
            let _ = ctx.catch();
            return None;
        }
    };
    let class = target.get::<Class<'js, JsField>>().ok()?;
    let field = class.borrow().field.clone();
    Some(field)
}

fn read_scope(scope: &ScopeRef, name: &str) -> Option<ScriptValue> {
    let ctx = scope.upgrade()?;
    let value = ctx.borrow().get(name);
    value
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Wrap script source so it runs inside the scope proxy and hands back a
/// lookup that resolves a name through the script's own scope at call time,
/// so handlers the script rebinds later are still found. The prefix stays on
/// the first line so reported line numbers match the source.
pub(crate) fn wrap_source(source: &str) -> String {
    format!(
        "with (__vrml_scope) {{ (function () {{ {}\n;return function (__vrml_name) {{ \
         try {{ return eval(__vrml_name); }} catch (__vrml_e) {{ return undefined; }} }};\n}})() }}",
        source
    )
}

/// Look `name` up through a lookup returned by [`wrap_source`].
pub(crate) fn lookup_function<'js>(
    ctx: &Ctx<'js>,
    lookup: &Function<'js>,
    name: &str,
) -> Option<Function<'js>> {
    if !is_identifier(name) {
        return None;
    }
    match lookup.call::<_, Value>((name,)) {
        Ok(value) => value.into_function(),
        Err(_) => {
            let _ = ctx.catch();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_source_keeps_first_line() {
        let wrapped = wrap_source("function set_in(v) {}");
        assert!(wrapped.lines().next().unwrap().ends_with("function set_in(v) {}"));
        assert!(wrapped.contains("eval(__vrml_name)"));
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("set_fraction"));
        assert!(is_identifier("$x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier(""));
    }
}
