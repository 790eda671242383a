//! Engine configuration.

use crate::field::{ConfigurationError, FieldType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Language version a script engine serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// VRML97 `javascript:`/`vrmlscript:` scripts.
    Vrml97,
    /// X3D ECMAScript binding.
    X3d,
}

impl Profile {
    pub fn name(self) -> &'static str {
        match self {
            Profile::Vrml97 => "VRML97",
            Profile::X3d => "X3D",
        }
    }

    /// Whether scripts under this profile may hold fields of `field_type`.
    pub fn supports(self, field_type: FieldType) -> bool {
        match self {
            Profile::Vrml97 => !field_type.is_x3d_only(),
            Profile::X3d => true,
        }
    }

    pub fn check(self, field_type: FieldType) -> Result<(), ConfigurationError> {
        if self.supports(field_type) {
            Ok(())
        } else {
            Err(ConfigurationError::UnsupportedFieldType {
                field_type,
                profile: self.name(),
            })
        }
    }

    /// `prepareEvents` is an X3D addition; VRML97 scripts never get it.
    pub fn has_prepare_events(self) -> bool {
        matches!(self, Profile::X3d)
    }

    /// MIME types this profile's engine is registered under.
    pub fn content_types(self) -> &'static [&'static str] {
        match self {
            Profile::Vrml97 => &[
                "application/javascript",
                "application/x-javascript",
                "text/javascript",
                "application/vrmlscript",
                "text/vrmlscript",
            ],
            Profile::X3d => &["application/ecmascript", "text/ecmascript"],
        }
    }

    /// Resolve the profile serving a MIME type.
    pub fn for_content_type(content_type: &str) -> Result<Self, ConfigurationError> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        [Profile::Vrml97, Profile::X3d]
            .into_iter()
            .find(|p| p.content_types().contains(&mime.as_str()))
            .ok_or_else(|| ConfigurationError::UnsupportedContentType(content_type.to_string()))
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Split an inline script URL (`javascript:...`, `ecmascript:...`,
/// `vrmlscript:...`) into its content type and source text.
pub fn inline_script(url: &str) -> Option<(&'static str, &str)> {
    let trimmed = url.trim_start();
    [
        ("javascript:", "application/javascript"),
        ("vrmlscript:", "application/vrmlscript"),
        ("ecmascript:", "application/ecmascript"),
    ]
    .into_iter()
    .find_map(|(prefix, mime)| trimmed.strip_prefix(prefix).map(|src| (mime, src)))
}

/// Tunables for one scripting engine and the wrappers it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub profile: Profile,
    /// Heap limit for the shared runtime in bytes. `None` leaves the engine default.
    pub memory_limit: Option<usize>,
    /// Native stack limit in bytes.
    pub max_stack_size: Option<usize>,
    /// Garbage collection threshold in bytes.
    pub gc_threshold: Option<usize>,
    /// Forward `print`/`Browser.print` output to the error reporter's
    /// message channel.
    pub script_output: bool,
    /// Keep every diagnostic in the report adapter for later inspection.
    pub keep_diagnostics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: Profile::X3d,
            memory_limit: None,
            max_stack_size: Some(1024 * 1024),
            gc_threshold: None,
            script_output: true,
            keep_diagnostics: false,
        }
    }
}

impl EngineConfig {
    pub fn for_profile(profile: Profile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigurationError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.memory_limit == Some(0) {
            return Err(ConfigurationError::InvalidConfig(
                "memory_limit must be greater than zero".into(),
            ));
        }
        if matches!(self.max_stack_size, Some(size) if size < 16 * 1024) {
            return Err(ConfigurationError::InvalidConfig(
                "max_stack_size must be at least 16 KiB".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_field_coverage() {
        assert!(Profile::Vrml97.supports(FieldType::SFVec3f));
        assert!(!Profile::Vrml97.supports(FieldType::SFColorRGBA));
        assert!(!Profile::Vrml97.supports(FieldType::MFVec3d));
        assert!(FieldType::ALL.iter().all(|&ft| Profile::X3d.supports(ft)));
        assert!(Profile::Vrml97.check(FieldType::SFVec2d).is_err());
    }

    #[test]
    fn test_content_type_lookup() {
        assert_eq!(
            Profile::for_content_type("application/ecmascript").unwrap(),
            Profile::X3d
        );
        assert_eq!(
            Profile::for_content_type("text/javascript; charset=utf-8").unwrap(),
            Profile::Vrml97
        );
        assert!(Profile::for_content_type("application/x-java").is_err());
    }

    #[test]
    fn test_inline_script() {
        assert_eq!(
            inline_script("javascript: function f() {}"),
            Some(("application/javascript", " function f() {}"))
        );
        assert_eq!(inline_script("ecmascript:x=1").map(|s| s.0), Some("application/ecmascript"));
        assert_eq!(inline_script("http://example.com/a.js"), None);
    }

    #[test]
    fn test_config_from_json() {
        let config = EngineConfig::from_json(r#"{"profile": "vrml97", "memory_limit": 8388608}"#)
            .unwrap();
        assert_eq!(config.profile, Profile::Vrml97);
        assert_eq!(config.memory_limit, Some(8 * 1024 * 1024));
        assert!(config.script_output);

        assert!(EngineConfig::from_json(r#"{"max_stack_size": 10}"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }
}
