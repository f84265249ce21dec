//! Mangling: the bijective textual encoding of type descriptors and
//! function signatures.
//!
//! Reserved grammar: `$` separates segments and closes the paired
//! delimiters opened by `A$` (array), `C$` (class), `S$` (struct) and `T$`
//! (type-argument list); `N` is the nullable suffix; `_` is the wildcard
//! projection; single lowercase letters are builtin codes. Any persisted or
//! exported symbol name must stay inside this grammar to remain
//! demanglable.

mod demangler;
mod mangler;

use std::error::Error as StdError;
use std::fmt;

use crate::descriptor::Type;

pub use demangler::{demangle, demangle_function};
pub use mangler::{mangle, mangle_function};

/// Segment delimiter character.
pub const DELIMITER: char = '$';
/// Nullable suffix character.
pub const NULLABLE_SUFFIX: char = 'N';
/// Wildcard (star projection) character.
pub const WILDCARD: char = '_';

/// Resolves an aggregate's field types from its qualified name.
///
/// The mangled form of a struct carries only a name; the field list lives
/// in the symbol table, so demangling an `S$...$` token needs this
/// collaborator.
pub trait StructResolver {
    fn resolve(&self, qualified_name: &str) -> Option<Vec<Type>>;
}

/// Resolver for inputs that are known not to mention struct types.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStructs;

impl StructResolver for NoStructs {
    fn resolve(&self, _qualified_name: &str) -> Option<Vec<Type>> {
        None
    }
}

/// A demangled function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Type>,
    pub dispatch_receiver: Option<Type>,
    pub extension_receiver: Option<Type>,
    pub context_receivers: Vec<Type>,
    pub type_args: Vec<Type>,
}

/// Malformed mangled input.
///
/// Carries the offending substring and its byte position so callers can
/// attach diagnostics; a demangle failure is never a partial parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemangleError {
    message: String,
    offending: String,
    position: usize,
}

impl DemangleError {
    pub fn new(message: impl Into<String>, offending: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            offending: offending.into(),
            position,
        }
    }

    #[must_use]
    pub fn offending(&self) -> &str {
        &self.offending
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }
}

impl fmt::Display for DemangleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at byte {} in `{}`",
            self.message, self.position, self.offending
        )
    }
}

impl StdError for DemangleError {}
