use super::{FieldError, FieldType};
use crate::node::NodeRef;

/// Native field value as stored by scene-graph nodes.
///
/// Multi-component kinds are flattened: an `MFVec3f` with two elements is a
/// `FloatArray` of six floats. `SFImage` is `[width, height, components,
/// pixel...]` and `MFImage` is a concatenation of such images.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    Bool(bool),
    Int32(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    BoolArray(Vec<bool>),
    Int32Array(Vec<i32>),
    LongArray(Vec<i64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
    Node(Option<NodeRef>),
    NodeArray(Vec<Option<NodeRef>>),
}

impl FieldData {
    /// Zero value for a field type: false, 0, empty string, null node or an
    /// empty array. `SFRotation` defaults to `0 0 1 0` and `SFImage` to a
    /// 0x0 image.
    pub fn default_for(field_type: FieldType) -> FieldData {
        use FieldType::*;
        match field_type {
            SFBool => FieldData::Bool(false),
            SFInt32 => FieldData::Int32(0),
            SFLong => FieldData::Long(0),
            SFFloat => FieldData::Float(0.0),
            SFDouble | SFTime => FieldData::Double(0.0),
            SFString => FieldData::String(String::new()),
            SFRotation => FieldData::FloatArray(vec![0.0, 0.0, 1.0, 0.0]),
            SFColor | SFColorRGBA | SFVec2f | SFVec3f | SFVec4f => {
                FieldData::FloatArray(vec![0.0; field_type.components()])
            }
            SFVec2d | SFVec3d | SFVec4d => {
                FieldData::DoubleArray(vec![0.0; field_type.components()])
            }
            SFImage => FieldData::Int32Array(vec![0, 0, 0]),
            SFNode => FieldData::Node(None),
            MFBool => FieldData::BoolArray(Vec::new()),
            MFInt32 | MFImage => FieldData::Int32Array(Vec::new()),
            MFLong => FieldData::LongArray(Vec::new()),
            MFFloat | MFColor | MFColorRGBA | MFRotation | MFVec2f | MFVec3f | MFVec4f => {
                FieldData::FloatArray(Vec::new())
            }
            MFDouble | MFTime | MFVec2d | MFVec3d | MFVec4d => FieldData::DoubleArray(Vec::new()),
            MFString => FieldData::StringArray(Vec::new()),
            MFNode => FieldData::NodeArray(Vec::new()),
        }
    }

    /// Check that this value has the shape a field of `field_type` stores.
    pub fn check_shape(&self, field_type: FieldType) -> Result<(), FieldError> {
        use FieldType::*;
        let ok = match (field_type, self) {
            (SFBool, FieldData::Bool(_))
            | (SFInt32, FieldData::Int32(_))
            | (SFLong, FieldData::Long(_))
            | (SFFloat, FieldData::Float(_))
            | (SFDouble | SFTime, FieldData::Double(_))
            | (SFString, FieldData::String(_))
            | (SFNode, FieldData::Node(_))
            | (MFBool, FieldData::BoolArray(_))
            | (MFLong, FieldData::LongArray(_))
            | (MFInt32, FieldData::Int32Array(_))
            | (MFFloat, FieldData::FloatArray(_))
            | (MFDouble | MFTime, FieldData::DoubleArray(_))
            | (MFString, FieldData::StringArray(_))
            | (MFNode, FieldData::NodeArray(_)) => true,
            (SFImage, FieldData::Int32Array(v)) => image_end(v, 0) == Some(v.len()),
            (MFImage, FieldData::Int32Array(v)) => {
                let mut offset = 0;
                while offset < v.len() {
                    match image_end(v, offset) {
                        Some(end) => offset = end,
                        None => break,
                    }
                }
                offset == v.len()
            }
            (ft, FieldData::FloatArray(v)) if ft.is_tuple() || ft.single().is_tuple() => {
                if ft.is_double_precision() {
                    false
                } else {
                    return check_tuple_len(ft, v.len());
                }
            }
            (ft, FieldData::DoubleArray(v)) if ft.single().is_tuple() => {
                if !ft.is_double_precision() {
                    false
                } else {
                    return check_tuple_len(ft, v.len());
                }
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(FieldError::InvalidType(field_type))
        }
    }

    /// Number of elements for multi-valued data, 1 otherwise.
    pub fn element_count(&self, field_type: FieldType) -> usize {
        if !field_type.is_multi() {
            return 1;
        }
        match self {
            FieldData::BoolArray(v) => v.len(),
            FieldData::Int32Array(v) if field_type == FieldType::MFImage => {
                let mut count = 0;
                let mut offset = 0;
                while let Some(end) = image_end(v, offset) {
                    count += 1;
                    offset = end;
                    if offset >= v.len() {
                        break;
                    }
                }
                count
            }
            FieldData::Int32Array(v) => v.len(),
            FieldData::LongArray(v) => v.len(),
            FieldData::FloatArray(v) => v.len() / field_type.components(),
            FieldData::DoubleArray(v) => v.len() / field_type.components(),
            FieldData::StringArray(v) => v.len(),
            FieldData::NodeArray(v) => v.len(),
            _ => 1,
        }
    }
}

fn check_tuple_len(field_type: FieldType, len: usize) -> Result<(), FieldError> {
    let expected = field_type.components();
    let ok = if field_type.is_multi() {
        len % expected == 0
    } else {
        len == expected
    };
    if ok {
        Ok(())
    } else {
        Err(FieldError::BadLength {
            field_type,
            len,
            expected,
        })
    }
}

/// End offset of the image header+pixels starting at `offset`, if it fits.
pub(crate) fn image_end(data: &[i32], offset: usize) -> Option<usize> {
    let header = data.get(offset..offset + 3)?;
    let (w, h) = (header[0], header[1]);
    if w < 0 || h < 0 || header[2] < 0 || header[2] > 4 {
        return None;
    }
    let end = (w as usize)
        .checked_mul(h as usize)?
        .checked_add(offset + 3)?;
    (end <= data.len()).then_some(end)
}
