use crate::node::NodeRef;
use std::cell::RefCell;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrowserError {
    #[error("{0} is not supported by this browser")]
    Unsupported(&'static str),
    #[error("Invalid route: {0}")]
    Route(String),
    #[error("Failed to parse scene text: {0}")]
    Parse(String),
}

/// What a script's `Browser` object can reach of the hosting browser.
///
/// Every method has a default so hosts only implement what they support.
/// Scene operations default to [`BrowserError::Unsupported`].
pub trait BrowserHost {
    fn name(&self) -> String {
        env!("CARGO_PKG_NAME").to_string()
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// Navigation speed in m/s.
    fn current_speed(&self) -> f64 {
        0.0
    }

    fn current_frame_rate(&self) -> f64 {
        0.0
    }

    fn world_url(&self) -> String {
        String::new()
    }

    fn description(&self) -> String {
        String::new()
    }

    fn set_description(&self, _description: &str) {}

    fn create_vrml_from_string(&self, _source: &str) -> Result<Vec<NodeRef>, BrowserError> {
        Err(BrowserError::Unsupported("createVrmlFromString"))
    }

    fn replace_world(&self, _nodes: Vec<NodeRef>) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("replaceWorld"))
    }

    fn load_url(&self, _url: &[String], _parameter: &[String]) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("loadURL"))
    }

    fn add_route(
        &self,
        _from: &NodeRef,
        _from_field: &str,
        _to: &NodeRef,
        _to_field: &str,
    ) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("addRoute"))
    }

    fn delete_route(
        &self,
        _from: &NodeRef,
        _from_field: &str,
        _to: &NodeRef,
        _to_field: &str,
    ) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("deleteRoute"))
    }

    /// X3D scene text, parsed the same way as `create_vrml_from_string`.
    fn create_x3d_from_string(&self, _source: &str) -> Result<Vec<NodeRef>, BrowserError> {
        Err(BrowserError::Unsupported("createX3DFromString"))
    }

    fn supported_profiles(&self) -> Vec<String> {
        Vec::new()
    }

    fn supported_components(&self) -> Vec<String> {
        Vec::new()
    }

    /// A new, unattached node of the given type, for `currentScene.createNode`.
    fn create_node(&self, _type_name: &str) -> Result<NodeRef, BrowserError> {
        Err(BrowserError::Unsupported("createNode"))
    }

    /// The node DEF'd as `name` in the current scene.
    fn named_node(&self, _name: &str) -> Result<Option<NodeRef>, BrowserError> {
        Err(BrowserError::Unsupported("getNamedNode"))
    }

    fn update_named_node(&self, _name: &str, _node: &NodeRef) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("updateNamedNode"))
    }

    fn remove_named_node(&self, _name: &str) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("removeNamedNode"))
    }

    /// Step through the bound viewpoints. Only X3D scripts reach these.
    fn next_viewpoint(&self) {}

    fn previous_viewpoint(&self) {}

    fn first_viewpoint(&self) {}

    fn last_viewpoint(&self) {}
}

/// Browser with no scene behind it. Keeps the description a script sets so
/// it can be read back.
#[derive(Debug, Default)]
pub struct DefaultBrowser {
    description: RefCell<String>,
}

impl DefaultBrowser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BrowserHost for DefaultBrowser {
    fn description(&self) -> String {
        self.description.borrow().clone()
    }

    fn set_description(&self, description: &str) {
        *self.description.borrow_mut() = description.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BasicNode;

    #[test]
    fn test_default_browser() {
        let browser = DefaultBrowser::new();
        assert_eq!(browser.name(), "vrml-script-bridge");
        browser.set_description("demo");
        assert_eq!(browser.description(), "demo");
        assert_eq!(
            browser.create_vrml_from_string("Shape {}").unwrap_err(),
            BrowserError::Unsupported("createVrmlFromString")
        );
        let node = BasicNode::new("Group").into_ref();
        assert!(browser.add_route(&node, "a", &node, "b").is_err());
        assert_eq!(
            browser.named_node("Arm").unwrap_err(),
            BrowserError::Unsupported("getNamedNode")
        );
        assert!(browser.supported_profiles().is_empty());
    }
}
