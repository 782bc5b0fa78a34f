//! Field and method descriptor parsing.
//!
//! Only the parts that matter for stack accounting are modelled: the slot width of each type
//! and the split of a method descriptor into parameter types and return type.

use crate::{assembly::VarKind, Result};

/// A parsed field type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `Lpkg/Name;` carrying the internal name.
    Object(String),
    /// `[` followed by the component type.
    Array(Box<FieldType>),
}

impl FieldType {
    /// Number of stack or local slots a value of this type occupies.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    /// The computational kind of this type, as used by loads, stores and returns.
    #[must_use]
    pub fn var_kind(&self) -> VarKind {
        match self {
            FieldType::Boolean
            | FieldType::Byte
            | FieldType::Char
            | FieldType::Short
            | FieldType::Int => VarKind::Int,
            FieldType::Long => VarKind::Long,
            FieldType::Float => VarKind::Float,
            FieldType::Double => VarKind::Double,
            FieldType::Object(_) | FieldType::Array(_) => VarKind::Ref,
        }
    }

    /// Internal name for reference types: `java/lang/String` or `[I`. `None` for primitives.
    #[must_use]
    pub fn internal_name(&self) -> Option<String> {
        match self {
            FieldType::Object(name) => Some(name.clone()),
            FieldType::Array(_) => Some(self.to_descriptor()),
            _ => None,
        }
    }

    /// Renders this type back into descriptor form.
    #[must_use]
    pub fn to_descriptor(&self) -> String {
        match self {
            FieldType::Boolean => "Z".into(),
            FieldType::Byte => "B".into(),
            FieldType::Char => "C".into(),
            FieldType::Short => "S".into(),
            FieldType::Int => "I".into(),
            FieldType::Long => "J".into(),
            FieldType::Float => "F".into(),
            FieldType::Double => "D".into(),
            FieldType::Object(name) => format!("L{name};"),
            FieldType::Array(component) => format!("[{}", component.to_descriptor()),
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order.
    pub params: Vec<FieldType>,
    /// Return type, `None` for `V`.
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parses a descriptor such as `(IJLjava/lang/String;)V`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidDescriptor`] if the descriptor is not well formed.
    pub fn parse(desc: &str) -> Result<Self> {
        let bytes = desc.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(crate::Error::InvalidDescriptor(desc.to_string()));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        while bytes.get(pos) != Some(&b')') {
            if pos >= bytes.len() {
                return Err(crate::Error::InvalidDescriptor(desc.to_string()));
            }
            let (ty, next) = parse_at(desc, pos)?;
            params.push(ty);
            pos = next;
        }
        pos += 1;
        let ret = if bytes.get(pos) == Some(&b'V') && pos + 1 == bytes.len() {
            None
        } else {
            let (ty, next) = parse_at(desc, pos)?;
            if next != bytes.len() {
                return Err(crate::Error::InvalidDescriptor(desc.to_string()));
            }
            Some(ty)
        };
        Ok(Self { params, ret })
    }

    /// Total slot width of the parameters, excluding any receiver.
    #[must_use]
    pub fn param_slots(&self) -> usize {
        self.params.iter().map(FieldType::size).sum()
    }

    /// Slot width of the return value, `0` for void.
    #[must_use]
    pub fn return_slots(&self) -> usize {
        self.ret.as_ref().map_or(0, FieldType::size)
    }
}

/// Parses a single field descriptor such as `J` or `[Ljava/lang/Object;`.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidDescriptor`] if the descriptor is not exactly one type.
pub fn parse_field(desc: &str) -> Result<FieldType> {
    let (ty, next) = parse_at(desc, 0)?;
    if next != desc.len() {
        return Err(crate::Error::InvalidDescriptor(desc.to_string()));
    }
    Ok(ty)
}

/// Slot width of a field descriptor; malformed descriptors count as one slot.
#[must_use]
pub fn field_slots(desc: &str) -> usize {
    match desc.as_bytes().first() {
        Some(b'J' | b'D') => 2,
        _ => 1,
    }
}

/// `(parameter slots, return slots)` of a method descriptor; malformed descriptors count as
/// `(0, 0)`. Bodies are validated up front by [`crate::assembly::MethodBody::verify`].
#[must_use]
pub fn method_slots(desc: &str) -> (usize, usize) {
    MethodDescriptor::parse(desc).map_or((0, 0), |d| (d.param_slots(), d.return_slots()))
}

/// `(parameter count, return count)` of a method descriptor, counting each value once
/// regardless of width; malformed descriptors count as `(0, 0)`.
#[must_use]
pub fn method_values(desc: &str) -> (usize, usize) {
    MethodDescriptor::parse(desc).map_or((0, 0), |d| (d.params.len(), usize::from(d.ret.is_some())))
}

fn parse_at(desc: &str, pos: usize) -> Result<(FieldType, usize)> {
    let bytes = desc.as_bytes();
    let invalid = || crate::Error::InvalidDescriptor(desc.to_string());
    let ty = match bytes.get(pos).ok_or_else(invalid)? {
        b'Z' => FieldType::Boolean,
        b'B' => FieldType::Byte,
        b'C' => FieldType::Char,
        b'S' => FieldType::Short,
        b'I' => FieldType::Int,
        b'J' => FieldType::Long,
        b'F' => FieldType::Float,
        b'D' => FieldType::Double,
        b'L' => {
            let end = desc[pos..].find(';').ok_or_else(invalid)? + pos;
            if end == pos + 1 {
                return Err(invalid());
            }
            return Ok((FieldType::Object(desc[pos + 1..end].to_string()), end + 1));
        }
        b'[' => {
            let (component, next) = parse_at(desc, pos + 1)?;
            return Ok((FieldType::Array(Box::new(component)), next));
        }
        _ => return Err(invalid()),
    };
    Ok((ty, pos + 1))
}
