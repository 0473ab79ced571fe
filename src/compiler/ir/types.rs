//! Structural type definitions for compile-time layout

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    /// 8-bit unsigned integer type (1 byte)
    U8,
    /// 16-bit unsigned integer type (2 bytes)
    U16,
    /// 32-bit unsigned integer type (4 bytes)
    U32,
    /// 64-bit unsigned integer type (8 bytes, default for untyped literals)
    U64,
    /// 8-bit signed integer type (1 byte)
    I8,
    /// 16-bit signed integer type (2 bytes)
    I16,
    /// 32-bit signed integer type (4 bytes)
    I32,
    /// 64-bit signed integer type (8 bytes)
    I64,
    /// Boolean, stored as one byte on both sides of the ABI
    Bool,
}

impl PrimitiveType {
    /// Returns the size of this primitive type in bytes
    pub fn size(&self) -> usize {
        match self {
            PrimitiveType::U8 | PrimitiveType::I8 | PrimitiveType::Bool => 1,
            PrimitiveType::U16 | PrimitiveType::I16 => 2,
            PrimitiveType::U32 | PrimitiveType::I32 => 4,
            PrimitiveType::U64 | PrimitiveType::I64 => 8,
        }
    }

    /// Parses a primitive type from its source spelling (e.g., "u8", "i32")
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "u8" => Some(PrimitiveType::U8),
            "u16" => Some(PrimitiveType::U16),
            "u32" => Some(PrimitiveType::U32),
            "u64" => Some(PrimitiveType::U64),
            "i8" => Some(PrimitiveType::I8),
            "i16" => Some(PrimitiveType::I16),
            "i32" => Some(PrimitiveType::I32),
            "i64" => Some(PrimitiveType::I64),
            "bool" => Some(PrimitiveType::Bool),
            _ => None,
        }
    }

    /// Source spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::I8 => "i8",
            PrimitiveType::I16 => "i16",
            PrimitiveType::I32 => "i32",
            PrimitiveType::I64 => "i64",
            PrimitiveType::Bool => "bool",
        }
    }

    /// Converts this primitive type to the `linux/types.h` spelling shared by both C units
    pub fn c_name(&self) -> &'static str {
        match self {
            PrimitiveType::U8 | PrimitiveType::Bool => "__u8",
            PrimitiveType::U16 => "__u16",
            PrimitiveType::U32 => "__u32",
            PrimitiveType::U64 => "__u64",
            PrimitiveType::I8 => "__s8",
            PrimitiveType::I16 => "__s16",
            PrimitiveType::I32 => "__s32",
            PrimitiveType::I64 => "__s64",
        }
    }

    /// printf conversion used by the userspace event printer
    pub fn printf_format(&self) -> &'static str {
        match self {
            PrimitiveType::U8 | PrimitiveType::U16 | PrimitiveType::U32 | PrimitiveType::Bool => {
                "%u"
            }
            PrimitiveType::I8 | PrimitiveType::I16 | PrimitiveType::I32 => "%d",
            PrimitiveType::U64 => "%llu",
            PrimitiveType::I64 => "%lld",
        }
    }

    /// Whether the type is signed
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            PrimitiveType::I8 | PrimitiveType::I16 | PrimitiveType::I32 | PrimitiveType::I64
        )
    }
}

/// Structural type after alias erasure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrType {
    /// No value (function returns only)
    Void,
    /// Scalar
    Primitive(PrimitiveType),
    /// Fixed-size array
    Array(Box<IrType>, usize),
    /// Anonymous struct with ordered fields
    Struct(Vec<IrField>),
}

/// A field of a struct type or config schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IrField {
    /// Field name
    pub name: String,
    /// Structural field type
    pub ty: IrType,
    /// Alias the field was declared with, kept for display only
    pub alias: Option<String>,
}

impl IrType {
    /// Shorthand for a primitive type
    pub fn prim(p: PrimitiveType) -> Self {
        IrType::Primitive(p)
    }

    /// Size in bytes under natural C alignment
    pub fn size(&self) -> usize {
        match self {
            IrType::Void => 0,
            IrType::Primitive(p) => p.size(),
            IrType::Array(elem, count) => elem.size() * count,
            IrType::Struct(fields) => {
                let mut offset = 0;
                for field in fields {
                    offset = align_up(offset, field.ty.align());
                    offset += field.ty.size();
                }
                align_up(offset, self.align())
            }
        }
    }

    /// Alignment in bytes under natural C alignment
    pub fn align(&self) -> usize {
        match self {
            IrType::Void => 1,
            IrType::Primitive(p) => p.size(),
            IrType::Array(elem, _) => elem.align(),
            IrType::Struct(fields) => fields.iter().map(|f| f.ty.align()).max().unwrap_or(1),
        }
    }

    /// Byte offsets of each field of a struct type
    pub fn field_offsets(&self) -> Vec<(String, usize)> {
        let IrType::Struct(fields) = self else {
            return Vec::new();
        };
        let mut offset = 0;
        let mut out = Vec::with_capacity(fields.len());
        for field in fields {
            offset = align_up(offset, field.ty.align());
            out.push((field.name.clone(), offset));
            offset += field.ty.size();
        }
        out
    }

    /// Structural equality ignoring alias display names
    pub fn same_layout(&self, other: &IrType) -> bool {
        match (self, other) {
            (IrType::Void, IrType::Void) => true,
            (IrType::Primitive(a), IrType::Primitive(b)) => a == b,
            (IrType::Array(a, n), IrType::Array(b, m)) => n == m && a.same_layout(b),
            (IrType::Struct(a), IrType::Struct(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(x, y)| x.name == y.name && x.ty.same_layout(&y.ty))
            }
            _ => false,
        }
    }

    /// The primitive, if scalar
    pub fn primitive(&self) -> Option<PrimitiveType> {
        match self {
            IrType::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    /// Whether the type is an integer or bool scalar
    pub fn is_scalar(&self) -> bool {
        matches!(self, IrType::Primitive(_))
    }

    /// Field lookup on struct types
    pub fn field(&self, name: &str) -> Option<&IrField> {
        match self {
            IrType::Struct(fields) => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => f.write_str("void"),
            IrType::Primitive(p) => f.write_str(p.as_str()),
            IrType::Array(elem, count) => write!(f, "[{}; {}]", elem, count),
            IrType::Struct(fields) => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// A type use site: structural type plus the alias it was spelled with
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeUse {
    /// Structural type
    pub ty: IrType,
    /// Alias name used at the declaration, if any
    pub alias: Option<String>,
}

impl TypeUse {
    /// A type use with no alias
    pub fn plain(ty: IrType) -> Self {
        Self { ty, alias: None }
    }
}

/// Counter type of a bounded `for` loop over `start..end`
pub fn loop_counter_type(start: i64) -> PrimitiveType {
    if start < 0 {
        PrimitiveType::I64
    } else {
        PrimitiveType::U64
    }
}

/// Type of an integer literal
pub fn literal_type(value: i64) -> PrimitiveType {
    if value < 0 {
        PrimitiveType::I64
    } else {
        PrimitiveType::U64
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    if align <= 1 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, p: PrimitiveType) -> IrField {
        IrField {
            name: name.to_string(),
            ty: IrType::prim(p),
            alias: None,
        }
    }

    #[test]
    fn test_struct_layout_uses_natural_alignment() {
        let ty = IrType::Struct(vec![
            field("flag", PrimitiveType::Bool),
            field("count", PrimitiveType::U64),
            field("port", PrimitiveType::U16),
        ]);
        assert_eq!(ty.size(), 24);
        assert_eq!(ty.align(), 8);
        assert_eq!(
            ty.field_offsets(),
            vec![
                ("flag".to_string(), 0),
                ("count".to_string(), 8),
                ("port".to_string(), 16)
            ]
        );
    }

    #[test]
    fn test_same_layout_ignores_alias() {
        let mut aliased = field("n", PrimitiveType::U64);
        aliased.alias = Some("Counter".to_string());
        let a = IrType::Struct(vec![aliased]);
        let b = IrType::Struct(vec![field("n", PrimitiveType::U64)]);
        assert!(a.same_layout(&b));
        assert_ne!(a, b);
    }
}
