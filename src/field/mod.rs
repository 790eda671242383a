//! Field model shared by the scene graph and the scripting bridge.
//!
//! A [`FieldType`] is the closed set of VRML97/X3D value kinds a node field can
//! hold, an [`AccessType`] says how a field may be read and written, and
//! [`FieldData`] is the native value representation exchanged with nodes.

mod data;

pub use data::FieldData;
pub(crate) use data::image_end;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// Error raised when a native value does not fit a field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("Attempting to set invalid value type to {0} field")]
    InvalidType(FieldType),
    #[error("Invalid field index {0}")]
    InvalidIndex(usize),
    #[error("Unknown field {0}")]
    UnknownField(String),
    #[error("Value for {field_type} field has {len} components, expected a multiple of {expected}")]
    BadLength {
        field_type: FieldType,
        len: usize,
        expected: usize,
    },
    #[error("Field {0} is not writable")]
    NotWritable(String),
}

/// Error raised for a core/version mismatch. Fatal to the engine that hits it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Unknown field type: {0}")]
    UnknownFieldType(String),
    #[error("Unknown field type code: {0}")]
    UnknownFieldCode(u32),
    #[error("Unknown access type: {0}")]
    UnknownAccessType(String),
    #[error("Field type {field_type} is not available in the {profile} profile")]
    UnsupportedFieldType {
        field_type: FieldType,
        profile: &'static str,
    },
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("Scripting engine error: {0}")]
    Engine(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

macro_rules! field_types {
    ($( $variant:ident = $code:literal, $name:literal, $multi:literal, $components:literal, $x3d:literal; )*) => {
        /// Every value kind a VRML97/X3D field can hold.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum FieldType {
            $( $variant, )*
        }

        impl FieldType {
            /// All tags, in code order.
            pub const ALL: &'static [FieldType] = &[$( FieldType::$variant, )*];

            /// The type name as written in VRML/X3D content, e.g. `SFVec3f`.
            pub fn name(self) -> &'static str {
                match self {
                    $( FieldType::$variant => $name, )*
                }
            }

            /// Stable numeric code of the tag.
            pub fn code(self) -> u32 {
                match self {
                    $( FieldType::$variant => $code, )*
                }
            }

            pub fn from_code(code: u32) -> Result<Self, ConfigurationError> {
                match code {
                    $( $code => Ok(FieldType::$variant), )*
                    _ => {
                        log::error!("Unknown field type code {}", code);
                        Err(ConfigurationError::UnknownFieldCode(code))
                    }
                }
            }

            pub fn from_name(name: &str) -> Result<Self, ConfigurationError> {
                match name {
                    $( $name => Ok(FieldType::$variant), )*
                    _ => {
                        log::error!("Unknown field type {}", name);
                        Err(ConfigurationError::UnknownFieldType(name.to_string()))
                    }
                }
            }

            /// True for the multi-valued (`MF`) kinds.
            pub fn is_multi(self) -> bool {
                match self {
                    $( FieldType::$variant => $multi, )*
                }
            }

            /// Number of scalar components in one element (3 for `SFVec3f`).
            /// Variable-size kinds (images, strings, nodes) report 1.
            pub fn components(self) -> usize {
                match self {
                    $( FieldType::$variant => $components, )*
                }
            }

            /// True for kinds that only exist in X3D content.
            pub fn is_x3d_only(self) -> bool {
                match self {
                    $( FieldType::$variant => $x3d, )*
                }
            }
        }
    };
}

field_types! {
    SFInt32 = 1, "SFInt32", false, 1, false;
    MFInt32 = 2, "MFInt32", true, 1, false;
    SFFloat = 3, "SFFloat", false, 1, false;
    MFFloat = 4, "MFFloat", true, 1, false;
    SFDouble = 5, "SFDouble", false, 1, true;
    MFDouble = 6, "MFDouble", true, 1, true;
    SFTime = 7, "SFTime", false, 1, false;
    MFTime = 8, "MFTime", true, 1, false;
    SFLong = 9, "SFLong", false, 1, true;
    MFLong = 10, "MFLong", true, 1, true;
    SFBool = 11, "SFBool", false, 1, false;
    MFBool = 12, "MFBool", true, 1, true;
    SFString = 13, "SFString", false, 1, false;
    MFString = 14, "MFString", true, 1, false;
    SFColor = 15, "SFColor", false, 3, false;
    MFColor = 16, "MFColor", true, 3, false;
    SFColorRGBA = 17, "SFColorRGBA", false, 4, true;
    MFColorRGBA = 18, "MFColorRGBA", true, 4, true;
    SFRotation = 19, "SFRotation", false, 4, false;
    MFRotation = 20, "MFRotation", true, 4, false;
    SFVec2f = 21, "SFVec2f", false, 2, false;
    MFVec2f = 22, "MFVec2f", true, 2, false;
    SFVec3f = 23, "SFVec3f", false, 3, false;
    MFVec3f = 24, "MFVec3f", true, 3, false;
    SFVec4f = 25, "SFVec4f", false, 4, true;
    MFVec4f = 26, "MFVec4f", true, 4, true;
    SFVec2d = 27, "SFVec2d", false, 2, true;
    MFVec2d = 28, "MFVec2d", true, 2, true;
    SFVec3d = 29, "SFVec3d", false, 3, true;
    MFVec3d = 30, "MFVec3d", true, 3, true;
    SFVec4d = 31, "SFVec4d", false, 4, true;
    MFVec4d = 32, "MFVec4d", true, 4, true;
    SFImage = 33, "SFImage", false, 1, false;
    MFImage = 34, "MFImage", true, 1, true;
    SFNode = 35, "SFNode", false, 1, false;
    MFNode = 36, "MFNode", true, 1, false;
}

impl FieldType {
    /// The single-valued kind of one element of this type.
    pub fn single(self) -> FieldType {
        use FieldType::*;
        match self {
            MFInt32 => SFInt32,
            MFFloat => SFFloat,
            MFDouble => SFDouble,
            MFTime => SFTime,
            MFLong => SFLong,
            MFBool => SFBool,
            MFString => SFString,
            MFColor => SFColor,
            MFColorRGBA => SFColorRGBA,
            MFRotation => SFRotation,
            MFVec2f => SFVec2f,
            MFVec3f => SFVec3f,
            MFVec4f => SFVec4f,
            MFVec2d => SFVec2d,
            MFVec3d => SFVec3d,
            MFVec4d => SFVec4d,
            MFImage => SFImage,
            MFNode => SFNode,
            other => other,
        }
    }

    /// The multi-valued counterpart of a single-valued kind.
    pub fn multi(self) -> FieldType {
        use FieldType::*;
        match self {
            SFInt32 => MFInt32,
            SFFloat => MFFloat,
            SFDouble => MFDouble,
            SFTime => MFTime,
            SFLong => MFLong,
            SFBool => MFBool,
            SFString => MFString,
            SFColor => MFColor,
            SFColorRGBA => MFColorRGBA,
            SFRotation => MFRotation,
            SFVec2f => MFVec2f,
            SFVec3f => MFVec3f,
            SFVec4f => MFVec4f,
            SFVec2d => MFVec2d,
            SFVec3d => MFVec3d,
            SFVec4d => MFVec4d,
            SFImage => MFImage,
            SFNode => MFNode,
            other => other,
        }
    }

    /// True for node-reference kinds.
    pub fn is_node(self) -> bool {
        matches!(self, FieldType::SFNode | FieldType::MFNode)
    }

    /// True for single-valued kinds carried as a primitive script value
    /// (boolean, number, string) rather than a field object.
    pub fn is_primitive(self) -> bool {
        use FieldType::*;
        matches!(
            self,
            SFBool | SFInt32 | SFLong | SFFloat | SFDouble | SFTime | SFString
        )
    }

    /// True for fixed-width numeric tuples (vectors, colors, rotations).
    pub fn is_tuple(self) -> bool {
        use FieldType::*;
        matches!(
            self,
            SFColor | SFColorRGBA | SFRotation | SFVec2f | SFVec3f | SFVec4f | SFVec2d | SFVec3d | SFVec4d
        )
    }

    /// True when the tuple components are stored in double precision.
    pub fn is_double_precision(self) -> bool {
        use FieldType::*;
        matches!(
            self.single(),
            SFDouble | SFTime | SFVec2d | SFVec3d | SFVec4d
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a field may be accessed. VRML97 and X3D spell these differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    /// `field` / `initializeOnly`
    Field,
    /// `eventIn` / `inputOnly`
    EventIn,
    /// `eventOut` / `outputOnly`
    EventOut,
    /// `exposedField` / `inputOutput`
    ExposedField,
}

impl AccessType {
    pub fn parse(keyword: &str) -> Result<Self, ConfigurationError> {
        match keyword {
            "field" | "initializeOnly" => Ok(AccessType::Field),
            "eventIn" | "inputOnly" => Ok(AccessType::EventIn),
            "eventOut" | "outputOnly" => Ok(AccessType::EventOut),
            "exposedField" | "inputOutput" => Ok(AccessType::ExposedField),
            _ => Err(ConfigurationError::UnknownAccessType(keyword.to_string())),
        }
    }

    pub fn vrml97_name(self) -> &'static str {
        match self {
            AccessType::Field => "field",
            AccessType::EventIn => "eventIn",
            AccessType::EventOut => "eventOut",
            AccessType::ExposedField => "exposedField",
        }
    }

    pub fn x3d_name(self) -> &'static str {
        match self {
            AccessType::Field => "initializeOnly",
            AccessType::EventIn => "inputOnly",
            AccessType::EventOut => "outputOnly",
            AccessType::ExposedField => "inputOutput",
        }
    }

    /// Whether a value can be routed out of the field.
    pub fn is_readable(self) -> bool {
        matches!(self, AccessType::EventOut | AccessType::ExposedField)
    }

    /// Whether a value can be routed into the field after setup.
    pub fn is_writable(self) -> bool {
        matches!(self, AccessType::EventIn | AccessType::ExposedField)
    }
}

/// Immutable description of one node field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDeclaration {
    pub name: SmolStr,
    pub access: AccessType,
    pub field_type: FieldType,
}

impl FieldDeclaration {
    pub fn new(name: impl Into<SmolStr>, access: AccessType, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            access,
            field_type,
        }
    }

    /// Parse a declaration line such as `eventOut SFFloat value`.
    pub fn parse(line: &str) -> Result<Self, ConfigurationError> {
        let mut parts = line.split_whitespace();
        let (Some(access), Some(field_type), Some(name), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ConfigurationError::InvalidConfig(format!(
                "Malformed field declaration: {}",
                line
            )));
        };
        Ok(Self::new(
            name,
            AccessType::parse(access)?,
            FieldType::from_name(field_type)?,
        ))
    }
}

impl fmt::Display for FieldDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.access.vrml97_name(),
            self.field_type,
            self.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_and_codes_round_trip() {
        for &ft in FieldType::ALL {
            assert_eq!(FieldType::from_name(ft.name()).unwrap(), ft);
            assert_eq!(FieldType::from_code(ft.code()).unwrap(), ft);
        }
    }

    #[test]
    fn test_unknown_tag_is_configuration_error() {
        assert_eq!(
            FieldType::from_name("SFMatrix3f"),
            Err(ConfigurationError::UnknownFieldType("SFMatrix3f".into()))
        );
        assert!(FieldType::from_code(0).is_err());
    }

    #[test]
    fn test_single_multi_pairing() {
        for &ft in FieldType::ALL {
            if ft.is_multi() {
                assert!(!ft.single().is_multi());
                assert_eq!(ft.single().multi(), ft);
            } else {
                assert_eq!(ft.multi().single(), ft);
            }
        }
    }

    #[test]
    fn test_access_keywords() {
        assert_eq!(AccessType::parse("inputOnly").unwrap(), AccessType::EventIn);
        assert_eq!(AccessType::parse("eventIn").unwrap(), AccessType::EventIn);
        assert_eq!(
            AccessType::parse("inputOutput").unwrap(),
            AccessType::ExposedField
        );
        assert!(AccessType::parse("readWrite").is_err());
    }

    #[test]
    fn test_parse_declaration() {
        let decl = FieldDeclaration::parse("eventOut SFFloat value").unwrap();
        assert_eq!(decl.name, "value");
        assert_eq!(decl.access, AccessType::EventOut);
        assert_eq!(decl.field_type, FieldType::SFFloat);
        assert_eq!(decl.to_string(), "eventOut SFFloat value");
        assert!(FieldDeclaration::parse("eventOut SFFloat").is_err());
    }
}
