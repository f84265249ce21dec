//! Symbol tables: the persisted index of exported functions and
//! aggregates.
//!
//! A table is an ordered list of entries. Order is meaningful: lookups
//! return the first match, so merging tables by concatenation gives the
//! earlier table precedence without any rewriting.

mod codec;
mod index;

use serde::{Deserialize, Serialize};

use crate::descriptor::Type;
use crate::layout::FieldSpec;
use crate::mangle;

pub use codec::{
    decode_table, encode_table, read_table_file, write_table_file, CodecError, FORMAT_VERSION,
};
pub use index::{SymbolIndex, TableResolver};

/// Table-local identifier assigned at export time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// Source position an entry was exported from, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePos {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// One exported entry.
///
/// Default serde variant tagging keeps the record bincode-compatible; the
/// codec is a binary format, not a self-describing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Symbol {
    Function {
        id: SymbolId,
        qualified_name: String,
        short_name: String,
        pos: SourcePos,
        ret: Type,
        params: Vec<Type>,
        dispatch_receiver: Option<Type>,
        extension_receiver: Option<Type>,
        context_receivers: Vec<Type>,
        type_args: Vec<Type>,
    },
    Aggregate {
        id: SymbolId,
        qualified_name: String,
        short_name: String,
        pos: SourcePos,
        fields: Vec<Type>,
        /// Explicit per-field alignment overrides; empty when every field
        /// uses its natural alignment.
        field_aligns: Vec<Option<usize>>,
        /// The generic definition this entry was specialized from, if any.
        specialized_from: Option<String>,
    },
}

impl Symbol {
    #[must_use]
    pub fn id(&self) -> SymbolId {
        match self {
            Symbol::Function { id, .. } | Symbol::Aggregate { id, .. } => *id,
        }
    }

    #[must_use]
    pub fn qualified_name(&self) -> &str {
        match self {
            Symbol::Function { qualified_name, .. }
            | Symbol::Aggregate { qualified_name, .. } => qualified_name,
        }
    }

    #[must_use]
    pub fn short_name(&self) -> &str {
        match self {
            Symbol::Function { short_name, .. } | Symbol::Aggregate { short_name, .. } => {
                short_name
            }
        }
    }

    #[must_use]
    pub fn pos(&self) -> &SourcePos {
        match self {
            Symbol::Function { pos, .. } | Symbol::Aggregate { pos, .. } => pos,
        }
    }

    /// Layout inputs for an aggregate entry: each field paired with its
    /// recorded alignment override, ready for
    /// [`AggregateLayout::compute`](crate::layout::AggregateLayout::compute).
    /// `None` for functions.
    #[must_use]
    pub fn field_specs(&self) -> Option<Vec<FieldSpec>> {
        let Symbol::Aggregate {
            fields,
            field_aligns,
            ..
        } = self
        else {
            return None;
        };
        Some(
            fields
                .iter()
                .enumerate()
                .map(
                    |(index, ty)| match field_aligns.get(index).copied().flatten() {
                        Some(align) => FieldSpec::aligned(ty.clone(), align),
                        None => FieldSpec::plain(ty.clone()),
                    },
                )
                .collect(),
        )
    }

    /// The linkable name of this entry.
    #[must_use]
    pub fn mangled_name(&self) -> String {
        match self {
            Symbol::Function {
                qualified_name,
                ret,
                params,
                dispatch_receiver,
                extension_receiver,
                context_receivers,
                type_args,
                ..
            } => mangle::mangle_function(
                qualified_name,
                ret,
                params,
                dispatch_receiver.as_ref(),
                extension_receiver.as_ref(),
                context_receivers,
                type_args,
            ),
            Symbol::Aggregate {
                qualified_name,
                fields,
                ..
            } => mangle::mangle(&Type::Struct {
                name: qualified_name.clone(),
                fields: fields.clone(),
            }),
        }
    }
}

/// An ordered symbol table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolTable {
    entries: Vec<Symbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new(entries: Vec<Symbol>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[Symbol] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, symbol: Symbol) {
        self.entries.push(symbol);
    }

    /// Append every entry of `other`, preserving both orders. Entries of
    /// `self` keep precedence in first-match lookups.
    pub fn merge(&mut self, other: SymbolTable) {
        self.entries.extend(other.entries);
    }
}

impl IntoIterator for SymbolTable {
    type Item = Symbol;
    type IntoIter = std::vec::IntoIter<Symbol>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::descriptor::BuiltinTag;

    pub fn pos(line: u32) -> SourcePos {
        SourcePos {
            file: "demo/lib.ch".into(),
            line,
            column: 1,
        }
    }

    pub fn function(id: u32, qualified_name: &str) -> Symbol {
        Symbol::Function {
            id: SymbolId(id),
            qualified_name: qualified_name.into(),
            short_name: qualified_name
                .rsplit('.')
                .next()
                .unwrap_or(qualified_name)
                .into(),
            pos: pos(id),
            ret: Type::builtin(BuiltinTag::Int),
            params: vec![Type::builtin(BuiltinTag::Int)],
            dispatch_receiver: None,
            extension_receiver: None,
            context_receivers: Vec::new(),
            type_args: Vec::new(),
        }
    }

    pub fn aggregate(id: u32, qualified_name: &str, fields: Vec<Type>) -> Symbol {
        let field_aligns = vec![None; fields.len()];
        Symbol::Aggregate {
            id: SymbolId(id),
            qualified_name: qualified_name.into(),
            short_name: qualified_name
                .rsplit('.')
                .next()
                .unwrap_or(qualified_name)
                .into(),
            pos: pos(id),
            fields,
            field_aligns,
            specialized_from: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::testutil::{aggregate, function};
    use super::*;
    use crate::descriptor::BuiltinTag;

    #[test]
    fn merge_concatenates_in_order() {
        let mut first = SymbolTable::new(vec![function(1, "demo.add"), function(2, "demo.sub")]);
        let second = SymbolTable::new(vec![function(3, "demo.add")]);
        first.merge(second);
        let names: Vec<_> = first
            .entries()
            .iter()
            .map(|s| (s.id().0, s.qualified_name().to_string()))
            .collect();
        assert_eq!(
            names,
            vec![
                (1, "demo.add".to_string()),
                (2, "demo.sub".to_string()),
                (3, "demo.add".to_string())
            ]
        );
    }

    #[test]
    fn field_specs_carry_the_recorded_overrides() {
        use crate::layout::AggregateLayout;
        use crate::platform::{Platform, PointerWidth};

        let symbol = Symbol::Aggregate {
            id: SymbolId(1),
            qualified_name: "demo.Packet".into(),
            short_name: "Packet".into(),
            pos: super::testutil::pos(1),
            fields: vec![
                Type::builtin(BuiltinTag::Byte),
                Type::builtin(BuiltinTag::Int),
            ],
            field_aligns: vec![None, Some(4)],
            specialized_from: None,
        };

        let specs = symbol.field_specs().unwrap();
        assert_eq!(specs[0].align_override, None);
        assert_eq!(specs[1].align_override, Some(4));
        let platform = Platform::with_pointer_width(PointerWidth::Eight);
        let layout = AggregateLayout::compute(&specs, &platform).unwrap();
        assert_eq!(layout.offsets, vec![0, 4]);
        assert_eq!(layout.size, 8);

        assert!(function(2, "demo.add").field_specs().is_none());
    }

    #[test]
    fn mangled_names_follow_the_grammar() {
        let func = function(1, "demo.add");
        assert_eq!(func.mangled_name(), "demo.add$ii$$$$");
        let agg = aggregate(2, "demo.Pair", vec![Type::builtin(BuiltinTag::Int)]);
        assert_eq!(agg.mangled_name(), "S$demo.Pair$");
    }
}
