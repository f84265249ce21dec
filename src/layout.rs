//! Memory layout queries.
//!
//! Aggregates are laid out packed: fields sit at the running sum of the
//! preceding field sizes with no implicit padding, and the aggregate's
//! alignment is the largest field alignment. A field can opt into stricter
//! placement with an explicit alignment override, which rounds its offset
//! up and pads only where asked.

use std::error::Error as StdError;
use std::fmt;

use once_cell::sync::Lazy;

use crate::descriptor::Type;
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// The type has no size; wildcards never reach layout.
    Unsized(String),
    /// Field index past the end of the aggregate.
    FieldOutOfRange { index: usize, count: usize },
    /// Offset queries only make sense on aggregates.
    NotAnAggregate(String),
    /// Raw memory access to a managed reference.
    RawReferenceAccess(String),
    /// An alignment override that is zero or not a power of two.
    BadAlignment(usize),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::Unsized(ty) => write!(f, "type `{ty}` has no memory layout"),
            LayoutError::FieldOutOfRange { index, count } => {
                write!(f, "field index {index} out of range for {count} fields")
            }
            LayoutError::NotAnAggregate(ty) => {
                write!(f, "offset query on non-aggregate type `{ty}`")
            }
            LayoutError::RawReferenceAccess(ty) => {
                write!(f, "raw memory access to managed reference `{ty}`")
            }
            LayoutError::BadAlignment(align) => {
                write!(f, "alignment override {align} is not a power of two")
            }
        }
    }
}

impl StdError for LayoutError {}

/// Size of a value of `ty` in bytes.
pub fn size_of(ty: &Type, platform: &Platform) -> Result<usize, LayoutError> {
    match ty.storage() {
        Type::Builtin(tag) => Ok(tag.size(platform)),
        // References and arrays are address-sized as values; the pointee
        // is the runtime's business.
        Type::Reference { .. } | Type::Array(_) => Ok(platform.pointer_size()),
        Type::Struct { fields, .. } => {
            let mut total = 0usize;
            for field in fields {
                total += size_of(field, platform)?;
            }
            Ok(total)
        }
        Type::Wildcard => Err(LayoutError::Unsized(ty.to_string())),
        Type::Nullable(_) => unreachable!("storage() strips nullable wrappers"),
    }
}

/// Alignment of a value of `ty` in bytes.
pub fn align_of(ty: &Type, platform: &Platform) -> Result<usize, LayoutError> {
    match ty.storage() {
        Type::Builtin(tag) => Ok(tag.align(platform)),
        Type::Reference { .. } | Type::Array(_) => Ok(platform.pointer_size()),
        Type::Struct { fields, .. } => {
            let mut align = 0usize;
            for field in fields {
                align = align.max(align_of(field, platform)?);
            }
            Ok(align)
        }
        Type::Wildcard => Err(LayoutError::Unsized(ty.to_string())),
        Type::Nullable(_) => unreachable!("storage() strips nullable wrappers"),
    }
}

/// Byte offset of field `index` inside the aggregate `ty`.
pub fn offset_of(ty: &Type, index: usize, platform: &Platform) -> Result<usize, LayoutError> {
    let Type::Struct { fields, .. } = ty.storage() else {
        return Err(LayoutError::NotAnAggregate(ty.to_string()));
    };
    if index >= fields.len() {
        return Err(LayoutError::FieldOutOfRange {
            index,
            count: fields.len(),
        });
    }
    let mut offset = 0usize;
    for field in &fields[..index] {
        offset += size_of(field, platform)?;
    }
    Ok(offset)
}

/// Reject raw loads and stores of managed references.
pub fn ensure_raw_access(ty: &Type) -> Result<(), LayoutError> {
    if ty.is_raw_accessible() {
        Ok(())
    } else {
        Err(LayoutError::RawReferenceAccess(ty.to_string()))
    }
}

/// One field of an aggregate under layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub ty: Type,
    /// Explicit alignment; `None` keeps the packed placement.
    pub align_override: Option<usize>,
}

impl FieldSpec {
    #[must_use]
    pub fn plain(ty: Type) -> Self {
        Self {
            ty,
            align_override: None,
        }
    }

    #[must_use]
    pub fn aligned(ty: Type, align: usize) -> Self {
        Self {
            ty,
            align_override: Some(align),
        }
    }
}

/// Computed layout of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateLayout {
    pub size: usize,
    pub align: usize,
    pub offsets: Vec<usize>,
}

static EMPTY_LAYOUT: Lazy<AggregateLayout> = Lazy::new(|| AggregateLayout {
    size: 0,
    align: 0,
    offsets: Vec::new(),
});

impl AggregateLayout {
    /// Lay out `fields` in declaration order.
    pub fn compute(fields: &[FieldSpec], platform: &Platform) -> Result<Self, LayoutError> {
        if fields.is_empty() {
            return Ok(EMPTY_LAYOUT.clone());
        }
        let mut offsets = Vec::with_capacity(fields.len());
        let mut cursor = 0usize;
        let mut align = 0usize;
        for field in fields {
            let field_align = match field.align_override {
                Some(requested) => {
                    if requested == 0 || !requested.is_power_of_two() {
                        return Err(LayoutError::BadAlignment(requested));
                    }
                    cursor = round_up(cursor, requested);
                    requested
                }
                None => align_of(&field.ty, platform)?,
            };
            align = align.max(field_align);
            offsets.push(cursor);
            cursor += size_of(&field.ty, platform)?;
        }
        Ok(Self {
            size: cursor,
            align,
            offsets,
        })
    }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
