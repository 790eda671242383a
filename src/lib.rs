//! Event bridge between VRML97/X3D Script nodes and an embedded ECMAScript
//! engine.
//!
//! The host owns the scene graph and implements [`node::VrmlNode`]. For each
//! Script node it asks an [`scripting::EngineRegistry`] for a
//! [`scripting::ScriptWrapper`] and drives it through the event cascade.

pub mod config;
pub mod field;
pub mod node;
pub mod report;
pub mod scripting;

pub use config::{EngineConfig, Profile};
pub use field::{AccessType, ConfigurationError, FieldData, FieldDeclaration, FieldError, FieldType};
pub use node::{BasicNode, NodeRef, VrmlNode};
pub use report::{CollectingReporter, ErrorReporter, ReportAdapter, ScriptDiagnostic, Severity};
pub use scripting::{ScriptError, ScriptValue};

#[cfg(feature = "ecmascript")]
pub use scripting::{EngineRegistry, ScriptEngine, ScriptWrapper, WrapperState};
