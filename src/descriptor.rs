//! Type descriptor model.
//!
//! A closed set of variant types shared by the mangler, the layout engine
//! and the dispatcher. Descriptors are immutable trees; equality is
//! structural and every constructible descriptor round-trips through its
//! mangled form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// Builtin scalar tags.
///
/// Each tag owns a fixed single-letter mangled code and a platform-resolved
/// size; the native-width tags resolve to the pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinTag {
    Void,
    Byte,
    Short,
    Int,
    Long,
    NativeInt,
    UByte,
    UShort,
    UInt,
    ULong,
    NativeUInt,
    Float,
    Double,
    NativeFloat,
    Address,
}

impl BuiltinTag {
    pub const ALL: [BuiltinTag; 15] = [
        BuiltinTag::Void,
        BuiltinTag::Byte,
        BuiltinTag::Short,
        BuiltinTag::Int,
        BuiltinTag::Long,
        BuiltinTag::NativeInt,
        BuiltinTag::UByte,
        BuiltinTag::UShort,
        BuiltinTag::UInt,
        BuiltinTag::ULong,
        BuiltinTag::NativeUInt,
        BuiltinTag::Float,
        BuiltinTag::Double,
        BuiltinTag::NativeFloat,
        BuiltinTag::Address,
    ];

    /// The reserved lowercase mangling code.
    #[must_use]
    pub fn code(self) -> char {
        match self {
            BuiltinTag::Void => 'v',
            BuiltinTag::Byte => 'b',
            BuiltinTag::Short => 'h',
            BuiltinTag::Int => 'i',
            BuiltinTag::Long => 'l',
            BuiltinTag::NativeInt => 'n',
            BuiltinTag::UByte => 'e',
            BuiltinTag::UShort => 'g',
            BuiltinTag::UInt => 'j',
            BuiltinTag::ULong => 'm',
            BuiltinTag::NativeUInt => 'u',
            BuiltinTag::Float => 'f',
            BuiltinTag::Double => 'd',
            BuiltinTag::NativeFloat => 'r',
            BuiltinTag::Address => 'a',
        }
    }

    /// Inverse of [`BuiltinTag::code`].
    #[must_use]
    pub fn from_code(code: char) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| tag.code() == code)
    }

    /// Size in bytes on the given platform.
    #[must_use]
    pub fn size(self, platform: &Platform) -> usize {
        match self {
            BuiltinTag::Void => 0,
            BuiltinTag::Byte | BuiltinTag::UByte => 1,
            BuiltinTag::Short | BuiltinTag::UShort => 2,
            BuiltinTag::Int | BuiltinTag::UInt | BuiltinTag::Float => 4,
            BuiltinTag::Long | BuiltinTag::ULong | BuiltinTag::Double => 8,
            BuiltinTag::NativeInt
            | BuiltinTag::NativeUInt
            | BuiltinTag::NativeFloat
            | BuiltinTag::Address => platform.pointer_size(),
        }
    }

    /// Alignment equals size for every scalar; void has no alignment.
    #[must_use]
    pub fn align(self, platform: &Platform) -> usize {
        self.size(platform)
    }

    /// Whether values of this tag travel in integer registers.
    #[must_use]
    pub fn is_integer_class(self) -> bool {
        !matches!(
            self,
            BuiltinTag::Void | BuiltinTag::Float | BuiltinTag::Double | BuiltinTag::NativeFloat
        )
    }

    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            BuiltinTag::Byte
                | BuiltinTag::Short
                | BuiltinTag::Int
                | BuiltinTag::Long
                | BuiltinTag::NativeInt
        )
    }
}

impl fmt::Display for BuiltinTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BuiltinTag::Void => "void",
            BuiltinTag::Byte => "byte",
            BuiltinTag::Short => "short",
            BuiltinTag::Int => "int",
            BuiltinTag::Long => "long",
            BuiltinTag::NativeInt => "nint",
            BuiltinTag::UByte => "ubyte",
            BuiltinTag::UShort => "ushort",
            BuiltinTag::UInt => "uint",
            BuiltinTag::ULong => "ulong",
            BuiltinTag::NativeUInt => "nuint",
            BuiltinTag::Float => "float",
            BuiltinTag::Double => "double",
            BuiltinTag::NativeFloat => "nfloat",
            BuiltinTag::Address => "address",
        };
        f.write_str(text)
    }
}

/// A type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// Builtin scalar.
    Builtin(BuiltinTag),
    /// Managed class reference; pointer-sized, opaque to raw memory access.
    Reference {
        name: String,
        type_args: Vec<Type>,
    },
    /// Packed aggregate. The mangled form carries only the name; field
    /// types are recovered through a [`crate::mangle::StructResolver`].
    Struct {
        name: String,
        fields: Vec<Type>,
    },
    /// Array of `element`; always passed by reference, pointer-sized as a
    /// value.
    Array(Box<Type>),
    /// Nullable wrapper; storage identical to the wrapped type.
    Nullable(Box<Type>),
    /// Star projection; only meaningful inside type-argument lists.
    Wildcard,
}

impl Type {
    #[must_use]
    pub fn builtin(tag: BuiltinTag) -> Self {
        Type::Builtin(tag)
    }

    #[must_use]
    pub fn reference(name: impl Into<String>) -> Self {
        Type::Reference {
            name: name.into(),
            type_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn array(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    #[must_use]
    pub fn nullable(inner: Type) -> Self {
        Type::Nullable(Box::new(inner))
    }

    /// Strip nullable wrappers; nullability is a compile-time concept with
    /// no runtime representation of its own.
    #[must_use]
    pub fn storage(&self) -> &Type {
        let mut ty = self;
        while let Type::Nullable(inner) = ty {
            ty = inner;
        }
        ty
    }

    /// Whether values of this type may be read or written as raw memory.
    ///
    /// Managed references are address-sized for layout purposes only;
    /// touching one through raw memory is a programming error.
    #[must_use]
    pub fn is_raw_accessible(&self) -> bool {
        !matches!(self.storage(), Type::Reference { .. })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Builtin(tag) => write!(f, "{tag}"),
            Type::Reference { name, type_args } => {
                write!(f, "{name}")?;
                if !type_args.is_empty() {
                    write!(f, "<")?;
                    for (index, arg) in type_args.iter().enumerate() {
                        if index > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Struct { name, .. } => write!(f, "{name}"),
            Type::Array(element) => write!(f, "{element}[]"),
            Type::Nullable(inner) => write!(f, "{inner}?"),
            Type::Wildcard => f.write_str("*"),
        }
    }
}
