//! Field and type signature blobs (II.23.2)

use crate::types::{element_type, CodedToken, TableId};
use rimgen_binary_parser::BinaryReader;
use rimgen_core::{Error, Result};
use std::fmt;

/// Nesting limit for signature types; deeper blobs are treated as corrupt
const MAX_SIGNATURE_DEPTH: u32 = 64;

/// Highest array rank the runtime accepts
const MAX_ARRAY_RANK: u32 = 32;

/// A `TypeDefOrRefOrSpecEncoded` reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeToken {
    Def(u32),
    Ref(u32),
    Spec(u32),
}

impl TypeToken {
    fn decode(value: u32) -> Result<Self> {
        let row = value >> 2;
        match value & 0x3 {
            0 => Ok(TypeToken::Def(row)),
            1 => Ok(TypeToken::Ref(row)),
            2 => Ok(TypeToken::Spec(row)),
            tag => Err(Error::bad_signature(format!("Invalid type token tag {}", tag))),
        }
    }

    /// Convert the `extends` column of a `TypeDef` row; `None` for no base
    pub fn from_coded(token: CodedToken) -> Option<Self> {
        if token.is_null() {
            return None;
        }
        match token.table {
            TableId::TypeDef => Some(TypeToken::Def(token.row)),
            TableId::TypeRef => Some(TypeToken::Ref(token.row)),
            TableId::TypeSpec => Some(TypeToken::Spec(token.row)),
            _ => None,
        }
    }

    pub fn row(self) -> u32 {
        match self {
            TypeToken::Def(row) | TypeToken::Ref(row) | TypeToken::Spec(row) => row,
        }
    }
}

/// A decoded signature type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSig {
    /// Built-in element type: primitives, `string`, `object`, `typedref`
    Primitive(u8),
    Class(TypeToken),
    ValueType(TypeToken),
    SzArray(Box<TypeSig>),
    Array {
        element: Box<TypeSig>,
        rank: u32,
    },
    GenericInst {
        definition: TypeToken,
        value_type: bool,
        arguments: Vec<TypeSig>,
    },
    /// Generic parameter of the enclosing type
    Var(u32),
    /// Generic parameter of the enclosing method
    MVar(u32),
    Ptr(Box<TypeSig>),
    ByRef(Box<TypeSig>),
}

impl TypeSig {
    /// Decode a field signature blob (`0x06 CustomMod* Type`)
    pub fn parse_field(blob: &[u8]) -> Result<TypeSig> {
        let mut parser = SigParser::new(blob);
        let lead = parser.reader.read_u8()?;
        if lead != element_type::FIELD_SIG {
            return Err(Error::bad_signature(format!(
                "Expected field signature, found {:#04x}",
                lead
            )));
        }
        parser.parse_type(0)
    }

    /// Decode a `TypeSpec` blob
    pub fn parse_type_spec(blob: &[u8]) -> Result<TypeSig> {
        SigParser::new(blob).parse_type(0)
    }

    /// True for constructed generic types
    pub fn is_generic(&self) -> bool {
        matches!(self, TypeSig::GenericInst { .. })
    }

    /// True for single and multi-dimensional arrays
    pub fn is_array(&self) -> bool {
        matches!(self, TypeSig::SzArray(_) | TypeSig::Array { .. })
    }
}

/// A signature type with its tokens replaced by names, so it stays valid
/// outside the assembly it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeName {
    /// Class, value type or primitive full name
    Named(String),
    SzArray(Box<TypeName>),
    Array {
        element: Box<TypeName>,
        rank: u32,
    },
    GenericInst {
        definition: String,
        /// Simple name of the definition, e.g. ``List`1``
        simple_name: String,
        arguments: Vec<TypeName>,
    },
    Var(u32),
    MVar(u32),
    Ptr(Box<TypeName>),
    ByRef(Box<TypeName>),
}

impl TypeName {
    pub fn is_generic(&self) -> bool {
        matches!(self, TypeName::GenericInst { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeName::SzArray(_) | TypeName::Array { .. })
    }

    /// Bind type generic parameters `!n` to `arguments[n]`. Parameters
    /// without an argument are left as they are.
    pub fn substitute(&self, arguments: &[TypeName]) -> TypeName {
        match self {
            TypeName::Var(number) => arguments
                .get(*number as usize)
                .cloned()
                .unwrap_or(TypeName::Var(*number)),
            TypeName::Named(_) | TypeName::MVar(_) => self.clone(),
            TypeName::SzArray(element) => TypeName::SzArray(Box::new(element.substitute(arguments))),
            TypeName::Array { element, rank } => TypeName::Array {
                element: Box::new(element.substitute(arguments)),
                rank: *rank,
            },
            TypeName::GenericInst {
                definition,
                simple_name,
                arguments: inner,
            } => TypeName::GenericInst {
                definition: definition.clone(),
                simple_name: simple_name.clone(),
                arguments: inner.iter().map(|a| a.substitute(arguments)).collect(),
            },
            TypeName::Ptr(element) => TypeName::Ptr(Box::new(element.substitute(arguments))),
            TypeName::ByRef(element) => TypeName::ByRef(Box::new(element.substitute(arguments))),
        }
    }
}

/// Display name: generic arguments as `Name`1[[Arg]]` without assembly
/// qualification, generic parameters as `!0` / `!!0`
impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeName::Named(name) => f.write_str(name),
            TypeName::SzArray(element) => write!(f, "{}[]", element),
            TypeName::Array { element, rank } => {
                if *rank <= 1 {
                    write!(f, "{}[*]", element)
                } else {
                    write!(f, "{}[{}]", element, ",".repeat(*rank as usize - 1))
                }
            }
            TypeName::GenericInst {
                definition,
                arguments,
                ..
            } => {
                write!(f, "{}[", definition)?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "[{}]", argument)?;
                }
                f.write_str("]")
            }
            TypeName::Var(number) => write!(f, "!{}", number),
            TypeName::MVar(number) => write!(f, "!!{}", number),
            TypeName::Ptr(element) => write!(f, "{}*", element),
            TypeName::ByRef(element) => write!(f, "{}&", element),
        }
    }
}

struct SigParser<'a> {
    reader: BinaryReader<'a>,
}

impl<'a> SigParser<'a> {
    fn new(blob: &'a [u8]) -> Self {
        Self {
            reader: BinaryReader::new(blob),
        }
    }

    fn token(&mut self) -> Result<TypeToken> {
        TypeToken::decode(self.reader.read_compressed_u32()?)
    }

    fn skip_custom_modifiers(&mut self) -> Result<()> {
        while !self.reader.is_empty() {
            match self.reader.peek_u8()? {
                element_type::CMOD_REQD | element_type::CMOD_OPT => {
                    self.reader.read_u8()?;
                    self.token()?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn parse_type(&mut self, depth: u32) -> Result<TypeSig> {
        if depth > MAX_SIGNATURE_DEPTH {
            return Err(Error::bad_signature("Signature nesting too deep"));
        }

        self.skip_custom_modifiers()?;
        let code = self.reader.read_u8()?;

        let sig = match code {
            element_type::VOID..=element_type::STRING
            | element_type::TYPEDBYREF
            | element_type::I
            | element_type::U
            | element_type::OBJECT => TypeSig::Primitive(code),
            element_type::CLASS => TypeSig::Class(self.token()?),
            element_type::VALUETYPE => TypeSig::ValueType(self.token()?),
            element_type::SZARRAY => TypeSig::SzArray(Box::new(self.parse_type(depth + 1)?)),
            element_type::ARRAY => {
                let element = Box::new(self.parse_type(depth + 1)?);
                let rank = self.reader.read_compressed_u32()?;
                if rank == 0 || rank > MAX_ARRAY_RANK {
                    return Err(Error::bad_signature(format!("Invalid array rank {}", rank)));
                }
                let sizes = self.reader.read_compressed_u32()?;
                for _ in 0..sizes {
                    self.reader.read_compressed_u32()?;
                }
                let bounds = self.reader.read_compressed_u32()?;
                for _ in 0..bounds {
                    self.reader.read_compressed_u32()?;
                }
                TypeSig::Array { element, rank }
            }
            element_type::GENERICINST => {
                let kind = self.reader.read_u8()?;
                let value_type = match kind {
                    element_type::CLASS => false,
                    element_type::VALUETYPE => true,
                    other => {
                        return Err(Error::bad_signature(format!(
                            "Invalid generic instance kind {:#04x}",
                            other
                        )))
                    }
                };
                let definition = self.token()?;
                let count = self.reader.read_compressed_u32()?;
                let arguments = (0..count)
                    .map(|_| self.parse_type(depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                TypeSig::GenericInst {
                    definition,
                    value_type,
                    arguments,
                }
            }
            element_type::VAR => TypeSig::Var(self.reader.read_compressed_u32()?),
            element_type::MVAR => TypeSig::MVar(self.reader.read_compressed_u32()?),
            element_type::PTR => TypeSig::Ptr(Box::new(self.parse_type(depth + 1)?)),
            element_type::BYREF => TypeSig::ByRef(Box::new(self.parse_type(depth + 1)?)),
            element_type::FNPTR => {
                return Err(Error::bad_signature("Function pointer fields are not supported"))
            }
            other => {
                return Err(Error::bad_signature(format!(
                    "Unexpected element type {:#04x}",
                    other
                )))
            }
        };

        Ok(sig)
    }
}

/// Simple name of a built-in element type
pub fn primitive_name(code: u8) -> &'static str {
    match code {
        element_type::VOID => "Void",
        element_type::BOOLEAN => "Boolean",
        element_type::CHAR => "Char",
        element_type::I1 => "SByte",
        element_type::U1 => "Byte",
        element_type::I2 => "Int16",
        element_type::U2 => "UInt16",
        element_type::I4 => "Int32",
        element_type::U4 => "UInt32",
        element_type::I8 => "Int64",
        element_type::U8 => "UInt64",
        element_type::R4 => "Single",
        element_type::R8 => "Double",
        element_type::STRING => "String",
        element_type::TYPEDBYREF => "TypedReference",
        element_type::I => "IntPtr",
        element_type::U => "UIntPtr",
        element_type::OBJECT => "Object",
        _ => "Unknown",
    }
}
