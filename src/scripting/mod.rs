//! Script node support: field objects, the per-script namespace and the
//! engine glue that runs Script node code.

pub mod browser;
pub mod context;
pub mod factory;
pub mod fields;
pub mod value;

#[cfg(feature = "ecmascript")]
pub mod engine;
#[cfg(feature = "ecmascript")]
pub mod js_engine;
#[cfg(feature = "ecmascript")]
pub mod wrapper;

pub use browser::{BrowserError, BrowserHost, DefaultBrowser};
pub use context::ExecutionContext;
pub use factory::FieldFactory;
pub use fields::{FieldRef, FieldValueError, MutationRecord};
pub use value::{ForeignValue, ScriptValue};

#[cfg(feature = "ecmascript")]
pub use engine::{EngineRegistry, ScriptEngine};
#[cfg(feature = "ecmascript")]
pub use wrapper::{ScriptWrapper, WrapperState};

use crate::field::{ConfigurationError, FieldError};

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Value(#[from] FieldValueError),
    #[error("Script wrapper is {0}")]
    InvalidState(&'static str),
    #[error("Script evaluation failed: {0}")]
    Evaluation(String),
}

pub type Result<T> = std::result::Result<T, ScriptError>;

/// Script node fields owned by the host. They never reach script code.
pub const NON_USE_FIELDS: [&str; 3] = ["url", "mustEvaluate", "directOutput"];
