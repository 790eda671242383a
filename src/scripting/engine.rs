//! Scripting engines and the per-content-type registry.

use super::browser::{BrowserHost, DefaultBrowser};
use super::factory::FieldFactory;
use super::js_engine::Bindings;
use super::wrapper::ScriptWrapper;
use super::{Result, ScriptError};
use crate::config::{inline_script, EngineConfig, Profile};
use crate::field::ConfigurationError;
use crate::node::NodeRef;
use crate::report::{ErrorReporter, ReportAdapter};
use rquickjs::{Context, Runtime};
use rustc_hash::FxHashMap;
use std::cell::{OnceCell, RefCell};
use std::rc::Rc;

fn engine_err(e: rquickjs::Error) -> ScriptError {
    ScriptError::Configuration(ConfigurationError::Engine(e.to_string()))
}

/// One QuickJS runtime serving every script of a profile.
///
/// The bindings shared by all scripts (field constructors, the `Browser`
/// object, the scope machinery) are built on first use and reused for every
/// wrapper afterwards. Each wrapper gets its own context, so scripts never
/// see each other's globals.
pub struct ScriptEngine {
    runtime: Runtime,
    config: EngineConfig,
    reporter: Rc<ReportAdapter>,
    browser: Rc<dyn BrowserHost>,
    bindings: OnceCell<Rc<Bindings>>,
}

impl ScriptEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let reporter = if config.keep_diagnostics {
            ReportAdapter::new().with_history()
        } else {
            ReportAdapter::new()
        };
        Self::with_host(config, Rc::new(reporter), Rc::new(DefaultBrowser::new()))
    }

    /// Build an engine reporting to `reporter` and answering `Browser` calls
    /// with `browser`.
    pub fn with_host(
        config: EngineConfig,
        reporter: Rc<ReportAdapter>,
        browser: Rc<dyn BrowserHost>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Runtime::new().map_err(engine_err)?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        if let Some(threshold) = config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        tracing::debug!(profile = %config.profile, "script engine created");
        Ok(Self {
            runtime,
            config,
            reporter,
            browser,
            bindings: OnceCell::new(),
        })
    }

    pub fn profile(&self) -> Profile {
        self.config.profile
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reporter(&self) -> &Rc<ReportAdapter> {
        &self.reporter
    }

    /// Route script diagnostics to `reporter`; `None` restores the default
    /// sink.
    pub fn set_error_reporter(&self, reporter: Option<Rc<dyn ErrorReporter>>) {
        self.reporter.set_error_reporter(reporter);
    }

    fn bindings(&self) -> Rc<Bindings> {
        self.bindings
            .get_or_init(|| {
                tracing::debug!(profile = %self.config.profile, "building script bindings");
                Rc::new(Bindings::new(
                    FieldFactory::new(self.config.profile),
                    self.reporter.clone(),
                    self.browser.clone(),
                    self.config.script_output,
                ))
            })
            .clone()
    }

    /// A wrapper for one Script node's source. Call
    /// [`ScriptWrapper::initialize`] with the node to start it.
    pub fn create_wrapper(
        &self,
        source_name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<ScriptWrapper> {
        let context = Context::full(&self.runtime).map_err(engine_err)?;
        ScriptWrapper::new(context, self.bindings(), source_name, source)
    }

    /// Create and initialize a wrapper in one step.
    pub fn load(
        &self,
        source_name: impl Into<String>,
        source: impl Into<String>,
        node: NodeRef,
    ) -> Result<ScriptWrapper> {
        let mut wrapper = self.create_wrapper(source_name, source)?;
        wrapper.initialize(node)?;
        Ok(wrapper)
    }

    /// Run pending garbage collection on the shared runtime.
    pub fn run_gc(&self) {
        self.runtime.run_gc();
    }
}

/// Engines keyed by the profile their content types map to, created on
/// first request and kept for the registry's lifetime.
pub struct EngineRegistry {
    engines: RefCell<FxHashMap<Profile, Rc<ScriptEngine>>>,
    configs: FxHashMap<Profile, EngineConfig>,
    reporter: Rc<ReportAdapter>,
    browser: Rc<dyn BrowserHost>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::with_browser(Rc::new(DefaultBrowser::new()))
    }

    pub fn with_browser(browser: Rc<dyn BrowserHost>) -> Self {
        Self {
            engines: RefCell::new(FxHashMap::default()),
            configs: FxHashMap::default(),
            reporter: Rc::new(ReportAdapter::new()),
            browser,
        }
    }

    /// Use `config` for the engine of its profile. Only affects engines not
    /// created yet.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.configs.insert(config.profile, config);
        self
    }

    /// Share `reporter` with every engine created from now on, e.g. one built
    /// [`ReportAdapter::with_history`].
    pub fn with_reporter(mut self, reporter: Rc<ReportAdapter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn reporter(&self) -> &Rc<ReportAdapter> {
        &self.reporter
    }

    pub fn set_error_reporter(&self, reporter: Option<Rc<dyn ErrorReporter>>) {
        self.reporter.set_error_reporter(reporter);
    }

    pub fn engine_for_profile(&self, profile: Profile) -> Result<Rc<ScriptEngine>> {
        if let Some(engine) = self.engines.borrow().get(&profile) {
            return Ok(engine.clone());
        }
        let config = self
            .configs
            .get(&profile)
            .cloned()
            .unwrap_or_else(|| EngineConfig::for_profile(profile));
        let engine = Rc::new(ScriptEngine::with_host(
            config,
            self.reporter.clone(),
            self.browser.clone(),
        )?);
        self.engines.borrow_mut().insert(profile, engine.clone());
        Ok(engine)
    }

    /// The engine serving a MIME type such as `text/ecmascript`.
    pub fn engine_for(&self, content_type: &str) -> Result<Rc<ScriptEngine>> {
        let profile = Profile::for_content_type(content_type).map_err(|e| {
            log::error!("No script engine for {}", content_type);
            e
        })?;
        self.engine_for_profile(profile)
    }

    /// Pick the first inline script from a Script node's `url` list and
    /// build its wrapper.
    pub fn wrapper_for_urls(&self, urls: &[String]) -> Result<ScriptWrapper> {
        let (content_type, source) = urls
            .iter()
            .find_map(|url| inline_script(url))
            .ok_or_else(|| {
                ConfigurationError::UnsupportedContentType(urls.join(" "))
            })?;
        self.engine_for(content_type)?
            .create_wrapper(format!("Inline {} script", content_type), source)
    }

    pub fn loaded_profiles(&self) -> Vec<Profile> {
        self.engines.borrow().keys().copied().collect()
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_stack_size: Some(1),
            ..EngineConfig::default()
        };
        assert!(matches!(
            ScriptEngine::new(config),
            Err(ScriptError::Configuration(ConfigurationError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_registry_shares_engines_per_profile() {
        let registry = EngineRegistry::new();
        let a = registry.engine_for("application/javascript").unwrap();
        let b = registry.engine_for("text/vrmlscript").unwrap();
        let c = registry.engine_for("text/ecmascript").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(a.profile(), Profile::Vrml97);
        assert_eq!(c.profile(), Profile::X3d);
        assert_eq!(registry.loaded_profiles().len(), 2);
        assert!(Rc::ptr_eq(a.reporter(), c.reporter()));
    }

    #[test]
    fn test_registry_rejects_unknown_content() {
        let registry = EngineRegistry::new();
        assert!(registry.engine_for("application/x-java").is_err());
        let urls = vec!["http://example.com/script.class".to_string()];
        assert!(matches!(
            registry.wrapper_for_urls(&urls),
            Err(ScriptError::Configuration(ConfigurationError::UnsupportedContentType(_)))
        ));
        assert!(registry.loaded_profiles().is_empty());
    }

    #[test]
    fn test_wrapper_for_inline_url() {
        let registry = EngineRegistry::new();
        let urls = vec![
            "scripts/missing.js".to_string(),
            "ecmascript: function initialize() {}".to_string(),
        ];
        let wrapper = registry.wrapper_for_urls(&urls).unwrap();
        assert_eq!(wrapper.source_name(), "Inline application/ecmascript script");
        assert_eq!(wrapper.state(), crate::scripting::WrapperState::Uninitialized);
        assert_eq!(registry.loaded_profiles(), vec![Profile::X3d]);
    }

    #[test]
    fn test_registry_config_override() {
        let registry = EngineRegistry::new().with_config(EngineConfig {
            profile: Profile::Vrml97,
            script_output: false,
            ..EngineConfig::default()
        });
        let engine = registry.engine_for_profile(Profile::Vrml97).unwrap();
        assert!(!engine.config().script_output);
        let x3d = registry.engine_for_profile(Profile::X3d).unwrap();
        assert!(x3d.config().script_output);
    }
}
