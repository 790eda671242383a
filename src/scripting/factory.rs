//! Conversions between native field data and script values.
//!
//! [`to_script_value`] and [`to_native_value`] are the two total mappings
//! over [`FieldType`]; [`FieldFactory`] adds the profile check and the
//! argument handling behind the script-side constructors.

use super::fields::{
    check_component, coerce_element, default_tuple, math, pixel_count, FieldRef, FieldValueError,
    ImageValue, MAX_ELEMENTS,
};
use super::value::ScriptValue;
use super::{Result, ScriptError};
use crate::config::Profile;
use crate::field::{FieldData, FieldError, FieldType};
use crate::node::NodeRef;

/// Build the script value for native `data` of `field_type`.
pub fn to_script_value(field_type: FieldType, data: &FieldData) -> std::result::Result<ScriptValue, FieldError> {
    use FieldType::*;
    data.check_shape(field_type)?;
    let value = match (field_type, data) {
        (SFBool, FieldData::Bool(b)) => ScriptValue::Bool(*b),
        (SFInt32, FieldData::Int32(n)) => ScriptValue::Number(*n as f64),
        (SFLong, FieldData::Long(n)) => ScriptValue::Number(*n as f64),
        (SFFloat, FieldData::Float(n)) => ScriptValue::Number(*n as f64),
        (SFDouble | SFTime, FieldData::Double(n)) => ScriptValue::Number(*n),
        (SFString, FieldData::String(s)) => ScriptValue::String(s.clone()),
        (SFNode, FieldData::Node(node)) => node_value(node.as_ref()),
        (SFImage, FieldData::Int32Array(raw)) => ScriptValue::Field(FieldRef::image(
            SFImage,
            ImageValue::from_raw(raw).ok_or(FieldError::InvalidType(SFImage))?,
        )),
        (ft, FieldData::FloatArray(v)) if ft.is_tuple() => {
            ScriptValue::Field(FieldRef::tuple(ft, tuple_of(v.iter().map(|&n| n as f64))))
        }
        (ft, FieldData::DoubleArray(v)) if ft.is_tuple() => {
            ScriptValue::Field(FieldRef::tuple(ft, tuple_of(v.iter().copied())))
        }
        (MFBool, FieldData::BoolArray(v)) => list(MFBool, v.iter().map(|&b| ScriptValue::Bool(b))),
        (MFInt32, FieldData::Int32Array(v)) => list(MFInt32, v.iter().map(|&n| (n as f64).into())),
        (MFLong, FieldData::LongArray(v)) => list(MFLong, v.iter().map(|&n| (n as f64).into())),
        (MFFloat, FieldData::FloatArray(v)) => list(MFFloat, v.iter().map(|&n| (n as f64).into())),
        (MFDouble | MFTime, FieldData::DoubleArray(v)) => {
            list(field_type, v.iter().map(|&n| n.into()))
        }
        (MFString, FieldData::StringArray(v)) => list(MFString, v.iter().map(|s| s.as_str().into())),
        (MFNode, FieldData::NodeArray(v)) => list(MFNode, v.iter().map(|n| node_value(n.as_ref()))),
        (MFImage, FieldData::Int32Array(raw)) => {
            let mut images = Vec::new();
            let mut offset = 0;
            while offset < raw.len() {
                let end = crate::field::image_end(raw, offset).ok_or(FieldError::InvalidType(MFImage))?;
                let image = ImageValue::from_raw(&raw[offset..end]).ok_or(FieldError::InvalidType(MFImage))?;
                images.push(ScriptValue::Field(FieldRef::image(SFImage, image)));
                offset = end;
            }
            list(MFImage, images.into_iter())
        }
        (ft, FieldData::FloatArray(v)) => {
            let single = ft.single();
            let items = v
                .chunks(ft.components())
                .map(|c| ScriptValue::Field(FieldRef::tuple(single, tuple_of(c.iter().map(|&n| n as f64)))));
            list(ft, items)
        }
        (ft, FieldData::DoubleArray(v)) => {
            let single = ft.single();
            let items = v
                .chunks(ft.components())
                .map(|c| ScriptValue::Field(FieldRef::tuple(single, tuple_of(c.iter().copied()))));
            list(ft, items)
        }
        _ => return Err(FieldError::InvalidType(field_type)),
    };
    Ok(value)
}

fn node_value(node: Option<&NodeRef>) -> ScriptValue {
    match node {
        Some(node) => ScriptValue::Field(FieldRef::node(node.clone())),
        None => ScriptValue::Null,
    }
}

fn tuple_of(values: impl Iterator<Item = f64>) -> [f64; 4] {
    let mut out = [0.0; 4];
    for (slot, v) in out.iter_mut().zip(values) {
        *slot = v;
    }
    out
}

fn list(field_type: FieldType, items: impl Iterator<Item = ScriptValue>) -> ScriptValue {
    ScriptValue::Field(FieldRef::list(field_type, items.collect()))
}

/// Convert a script value back to native data for a field of `field_type`.
///
/// The value must already be of the declared kind: numbers for numeric
/// fields, a field object of the same type for everything else. `null`
/// clears an `SFNode`.
pub fn to_native_value(field_type: FieldType, value: &ScriptValue) -> std::result::Result<FieldData, FieldError> {
    use FieldType::*;
    let bad = || FieldError::InvalidType(field_type);
    let data = match (field_type, value) {
        (SFBool, ScriptValue::Bool(b)) => FieldData::Bool(*b),
        (SFInt32, ScriptValue::Number(n)) => FieldData::Int32(*n as i32),
        (SFLong, ScriptValue::Number(n)) => FieldData::Long(*n as i64),
        (SFFloat, ScriptValue::Number(n)) => FieldData::Float(*n as f32),
        (SFDouble | SFTime, ScriptValue::Number(n)) => FieldData::Double(*n),
        (SFString, ScriptValue::String(s)) => FieldData::String(s.clone()),
        (SFNode, v) if v.is_nullish() => FieldData::Node(None),
        (_, ScriptValue::Field(f)) if f.field_type() == field_type => field_to_native(f)?,
        _ => return Err(bad()),
    };
    Ok(data)
}

fn field_to_native(field: &FieldRef) -> std::result::Result<FieldData, FieldError> {
    use FieldType::*;
    let field_type = field.field_type();
    let bad = || FieldError::InvalidType(field_type);
    if field_type == SFNode {
        return Ok(FieldData::Node(field.node_ref()));
    }
    if field_type == SFImage {
        return Ok(FieldData::Int32Array(field.image_value().ok_or_else(bad)?.to_raw()));
    }
    if field_type.is_tuple() {
        let c = field.components().ok_or_else(bad)?;
        let c = &c[..field_type.components()];
        return Ok(if field_type.is_double_precision() {
            FieldData::DoubleArray(c.to_vec())
        } else {
            FieldData::FloatArray(c.iter().map(|&n| n as f32).collect())
        });
    }
    let items = field.elements().ok_or_else(bad)?;
    let element_type = field_type.single();
    let numbers = || items.iter().map(|v| v.as_number().ok_or_else(bad));
    let data = match field_type {
        MFBool => FieldData::BoolArray(
            items
                .iter()
                .map(|v| match v {
                    ScriptValue::Bool(b) => Ok(*b),
                    _ => Err(bad()),
                })
                .collect::<std::result::Result<_, _>>()?,
        ),
        MFInt32 => FieldData::Int32Array(numbers().map(|n| n.map(|n| n as i32)).collect::<std::result::Result<_, _>>()?),
        MFLong => FieldData::LongArray(numbers().map(|n| n.map(|n| n as i64)).collect::<std::result::Result<_, _>>()?),
        MFFloat => FieldData::FloatArray(numbers().map(|n| n.map(|n| n as f32)).collect::<std::result::Result<_, _>>()?),
        MFDouble | MFTime => FieldData::DoubleArray(numbers().collect::<std::result::Result<_, _>>()?),
        MFString => FieldData::StringArray(
            items
                .iter()
                .map(|v| match v {
                    ScriptValue::String(s) => Ok(s.clone()),
                    _ => Err(bad()),
                })
                .collect::<std::result::Result<_, _>>()?,
        ),
        MFNode => FieldData::NodeArray(
            items
                .iter()
                .map(|v| match v {
                    ScriptValue::Field(f) if f.field_type() == SFNode => Ok(f.node_ref()),
                    v if v.is_nullish() => Ok(None),
                    _ => Err(bad()),
                })
                .collect::<std::result::Result<_, _>>()?,
        ),
        MFImage => {
            let mut raw = Vec::new();
            for item in &items {
                let image = item
                    .as_field()
                    .filter(|f| f.field_type() == SFImage)
                    .and_then(FieldRef::image_value)
                    .ok_or_else(bad)?;
                raw.extend(image.to_raw());
            }
            FieldData::Int32Array(raw)
        }
        _ => {
            let width = element_type.components();
            let mut flat = Vec::with_capacity(items.len() * width);
            for item in &items {
                let c = item
                    .as_field()
                    .filter(|f| f.field_type() == element_type)
                    .and_then(FieldRef::components)
                    .ok_or_else(bad)?;
                flat.extend_from_slice(&c[..width]);
            }
            if field_type.is_double_precision() {
                FieldData::DoubleArray(flat)
            } else {
                FieldData::FloatArray(flat.into_iter().map(|n| n as f32).collect())
            }
        }
    };
    Ok(data)
}

/// Creates script values for one language profile.
///
/// Stateless apart from the profile, so one factory is shared by every
/// script an engine runs.
#[derive(Debug, Clone, Copy)]
pub struct FieldFactory {
    profile: Profile,
}

impl FieldFactory {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Wrap a field value. `None` produces the type's default value.
    pub fn create(&self, field_type: FieldType, data: Option<&FieldData>) -> Result<ScriptValue> {
        if let Err(e) = self.profile.check(field_type) {
            log::error!("Cannot create {} field: {}", field_type, e);
            return Err(e.into());
        }
        let value = match data {
            Some(data) => to_script_value(field_type, data)?,
            None => to_script_value(field_type, &FieldData::default_for(field_type))?,
        };
        Ok(value)
    }

    pub fn to_native(&self, field_type: FieldType, value: &ScriptValue) -> Result<FieldData> {
        self.profile.check(field_type)?;
        Ok(to_native_value(field_type, value)?)
    }

    /// Field types script code may construct with `new`.
    pub fn constructible_types(&self) -> Vec<FieldType> {
        FieldType::ALL
            .iter()
            .copied()
            .filter(|&ft| self.profile.supports(ft) && !ft.is_primitive())
            .collect()
    }

    /// Build a value from script constructor arguments, e.g.
    /// `new SFVec3f(1, 2, 3)` or `new MFString("a", "b")`. `SFNode` needs
    /// the browser to parse its argument and is not handled here.
    pub fn construct(&self, field_type: FieldType, args: &[ScriptValue]) -> Result<FieldRef> {
        use FieldType::*;
        self.profile.check(field_type)?;
        if field_type.is_primitive() || field_type == SFNode {
            return Err(ScriptError::Value(FieldValueError::InvalidValue {
                field_type,
                expected: "constructible field type",
                got: field_type.name().to_string(),
            }));
        }
        if field_type.is_multi() {
            let element_type = field_type.single();
            let items = args
                .iter()
                .map(|arg| coerce_element(element_type, arg))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            return Ok(FieldRef::list(field_type, items));
        }
        if field_type == SFImage {
            return Ok(FieldRef::image(SFImage, construct_image(args)?));
        }
        if field_type == SFRotation {
            return Ok(FieldRef::tuple(SFRotation, construct_rotation(args)?));
        }
        let mut c = default_tuple(field_type);
        let names = ["x", "y", "z", "w"];
        for (i, arg) in args.iter().take(field_type.components()).enumerate() {
            let n = number_arg(field_type, arg)?;
            check_component(field_type, names[i], n)?;
            c[i] = n;
        }
        Ok(FieldRef::tuple(field_type, c))
    }
}

fn number_arg(field_type: FieldType, arg: &ScriptValue) -> std::result::Result<f64, FieldValueError> {
    arg.as_number().ok_or_else(|| FieldValueError::InvalidValue {
        field_type,
        expected: "number",
        got: arg.type_name(),
    })
}

fn construct_image(args: &[ScriptValue]) -> std::result::Result<ImageValue, FieldValueError> {
    let ft = FieldType::SFImage;
    if args.is_empty() {
        return Ok(ImageValue::empty());
    }
    let mut dims = [0i32; 3];
    for (slot, arg) in dims.iter_mut().zip(args) {
        let n = number_arg(ft, arg)?;
        *slot = n as i32;
    }
    let [width, height, components] = dims;
    if width < 0 || height < 0 || !(0..=4).contains(&components) {
        return Err(FieldValueError::OutOfRange {
            field_type: ft,
            component: "size".into(),
            value: (width.min(height)).min(components) as f64,
        });
    }
    let count = match pixel_count(width, height) {
        Some(count) if count <= MAX_ELEMENTS => count,
        _ => {
            return Err(FieldValueError::OutOfRange {
                field_type: ft,
                component: "size".into(),
                value: f64::from(width) * f64::from(height),
            })
        }
    };
    let pixels = match args.get(3) {
        None => vec![0; count],
        Some(ScriptValue::Field(f)) if f.field_type() == FieldType::MFInt32 => {
            let items = f.elements().unwrap_or_default();
            if items.len() != count {
                return Err(FieldValueError::OutOfRange {
                    field_type: ft,
                    component: "array".into(),
                    value: items.len() as f64,
                });
            }
            items.iter().map(|v| v.as_number().unwrap_or(0.0) as i32).collect()
        }
        Some(other) => {
            return Err(FieldValueError::InvalidValue {
                field_type: ft,
                expected: "MFInt32",
                got: other.type_name(),
            })
        }
    };
    Ok(ImageValue {
        width,
        height,
        components,
        pixels,
    })
}

/// `SFRotation(x, y, z, angle)`, `SFRotation(axis, angle)` or
/// `SFRotation(fromVector, toVector)`.
fn construct_rotation(args: &[ScriptValue]) -> std::result::Result<[f64; 4], FieldValueError> {
    let ft = FieldType::SFRotation;
    let vector = |v: &ScriptValue| {
        v.as_field()
            .filter(|f| f.field_type() == FieldType::SFVec3f)
            .and_then(FieldRef::components)
    };
    match args {
        [] => Ok(default_tuple(ft)),
        [a, b] if vector(a).is_some() => {
            let axis = vector(a).unwrap_or_default();
            if let Some(to) = vector(b) {
                return math::rotation_between([axis[0], axis[1], axis[2]], [to[0], to[1], to[2]])
                    .ok_or(FieldValueError::OutOfRange {
                        field_type: ft,
                        component: "axis".into(),
                        value: 0.0,
                    });
            }
            let angle = number_arg(ft, b)?;
            Ok([axis[0], axis[1], axis[2], angle])
        }
        _ => {
            let mut c = default_tuple(ft);
            for (i, arg) in args.iter().take(4).enumerate() {
                c[i] = number_arg(ft, arg)?;
                check_component(ft, "component", c[i])?;
            }
            Ok(c)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BasicNode;

    fn sample(ft: FieldType) -> FieldData {
        use FieldType::*;
        match ft {
            SFBool => FieldData::Bool(true),
            SFInt32 => FieldData::Int32(-4),
            SFLong => FieldData::Long(1 << 40),
            SFFloat => FieldData::Float(1.5),
            SFDouble | SFTime => FieldData::Double(2.25),
            SFString => FieldData::String("hi".into()),
            SFNode => FieldData::Node(Some(BasicNode::new("Shape").into_ref())),
            SFImage => FieldData::Int32Array(vec![1, 2, 1, 7, 9]),
            MFImage => FieldData::Int32Array(vec![1, 1, 1, 5, 1, 1, 3, 6]),
            MFBool => FieldData::BoolArray(vec![true, false]),
            MFInt32 => FieldData::Int32Array(vec![1, 2, 3]),
            MFLong => FieldData::LongArray(vec![7]),
            MFFloat => FieldData::FloatArray(vec![0.5, 1.0]),
            MFDouble | MFTime => FieldData::DoubleArray(vec![0.25]),
            MFString => FieldData::StringArray(vec!["a".into(), "b".into()]),
            MFNode => FieldData::NodeArray(vec![Some(BasicNode::new("Group").into_ref()), None]),
            ft if ft.is_multi() && ft.is_double_precision() => {
                FieldData::DoubleArray((0..ft.components() * 2).map(|i| i as f64 / 10.0).collect())
            }
            ft if ft.is_multi() => {
                FieldData::FloatArray((0..ft.components() * 2).map(|i| i as f32 / 10.0).collect())
            }
            ft if ft.is_double_precision() => {
                FieldData::DoubleArray((0..ft.components()).map(|i| i as f64 / 10.0).collect())
            }
            ft => FieldData::FloatArray((0..ft.components()).map(|i| i as f32 / 10.0).collect()),
        }
    }

    // Every tag must survive native -> script -> native unchanged, so a new
    // field type cannot slip through either mapping.
    #[test]
    fn test_mappings_cover_every_field_type() {
        for &ft in FieldType::ALL {
            let data = sample(ft);
            let script = to_script_value(ft, &data).unwrap_or_else(|e| panic!("{}: {}", ft, e));
            let back = to_native_value(ft, &script).unwrap_or_else(|e| panic!("{}: {}", ft, e));
            assert_eq!(back, data, "{}", ft);
        }
    }

    #[test]
    fn test_wrong_script_type_is_rejected() {
        assert_eq!(
            to_native_value(FieldType::SFFloat, &ScriptValue::from("six")),
            Err(FieldError::InvalidType(FieldType::SFFloat))
        );
        let v = FieldRef::tuple(FieldType::SFVec3f, [0.0; 4]);
        assert!(to_native_value(FieldType::SFColor, &ScriptValue::Field(v)).is_err());
        assert_eq!(
            to_native_value(FieldType::SFNode, &ScriptValue::Null),
            Ok(FieldData::Node(None))
        );
    }

    #[test]
    fn test_profile_restricts_types() {
        let vrml = FieldFactory::new(Profile::Vrml97);
        assert!(matches!(
            vrml.create(FieldType::SFColorRGBA, None),
            Err(ScriptError::Configuration(_))
        ));
        assert!(vrml.create(FieldType::SFColor, None).is_ok());
        assert!(!vrml.constructible_types().contains(&FieldType::SFVec3d));
        assert!(FieldFactory::new(Profile::X3d)
            .constructible_types()
            .contains(&FieldType::SFVec3d));
    }

    #[test]
    fn test_construct_values() {
        let factory = FieldFactory::new(Profile::X3d);
        let v = factory
            .construct(FieldType::SFVec3f, &[1.0.into(), 2.0.into()])
            .unwrap();
        assert_eq!(v.components().unwrap(), [1.0, 2.0, 0.0, 0.0]);

        assert!(factory
            .construct(FieldType::SFColor, &[2.0.into()])
            .is_err());

        let names = factory
            .construct(FieldType::MFString, &["a".into(), "b".into()])
            .unwrap();
        assert_eq!(names.elements().unwrap().len(), 2);
        assert!(factory
            .construct(FieldType::MFFloat, &["a".into()])
            .is_err());

        let axis = ScriptValue::Field(v);
        let rot = factory
            .construct(FieldType::SFRotation, &[axis, 0.5.into()])
            .unwrap();
        assert_eq!(rot.components().unwrap()[3], 0.5);

        let img = factory
            .construct(FieldType::SFImage, &[2.0.into(), 1.0.into(), 1.0.into()])
            .unwrap();
        assert_eq!(img.image_value().unwrap().pixels.len(), 2);
    }
}
