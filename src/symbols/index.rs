//! Lookup structures over a loaded symbol table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::Type;
use crate::mangle::StructResolver;

use super::{Symbol, SymbolTable};

/// First-match index over a table.
///
/// Keys that occur more than once resolve to the earliest entry, which is
/// what makes [`SymbolTable::merge`] a precedence-preserving operation.
#[derive(Debug)]
pub struct SymbolIndex {
    table: SymbolTable,
    by_mangled: HashMap<String, usize>,
    by_qualified: HashMap<String, usize>,
}

impl SymbolIndex {
    #[must_use]
    pub fn build(table: SymbolTable) -> Self {
        let mut by_mangled = HashMap::with_capacity(table.len());
        let mut by_qualified = HashMap::with_capacity(table.len());
        for (position, symbol) in table.entries().iter().enumerate() {
            by_mangled
                .entry(symbol.mangled_name())
                .or_insert(position);
            by_qualified
                .entry(symbol.qualified_name().to_string())
                .or_insert(position);
        }
        Self {
            table,
            by_mangled,
            by_qualified,
        }
    }

    #[must_use]
    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    #[must_use]
    pub fn find_mangled(&self, mangled: &str) -> Option<&Symbol> {
        self.by_mangled
            .get(mangled)
            .map(|&position| &self.table.entries()[position])
    }

    #[must_use]
    pub fn find_qualified(&self, qualified_name: &str) -> Option<&Symbol> {
        self.by_qualified
            .get(qualified_name)
            .map(|&position| &self.table.entries()[position])
    }
}

/// [`StructResolver`] backed by a symbol index.
///
/// Demangling an `S$...$` token asks the table for the aggregate's fields;
/// non-aggregate entries under the same name do not resolve.
#[derive(Debug, Clone)]
pub struct TableResolver {
    index: Arc<SymbolIndex>,
}

impl TableResolver {
    #[must_use]
    pub fn new(index: Arc<SymbolIndex>) -> Self {
        Self { index }
    }
}

impl StructResolver for TableResolver {
    fn resolve(&self, qualified_name: &str) -> Option<Vec<Type>> {
        match self.index.find_qualified(qualified_name)? {
            Symbol::Aggregate { fields, .. } => Some(fields.clone()),
            Symbol::Function { .. } => None,
        }
    }
}
