//! Foreign call dispatch.
//!
//! A [`CallDescriptor`] names the native shape of a call: scalar return
//! tag, scalar parameter tags and calling convention. Descriptors are
//! interned so equal shapes share one allocation, which lets the per-call
//! caches key on pointer identity.
//!
//! Two strategies drive the actual transfer. The direct path transmutes
//! the target address to a concrete `extern "C"` function type when the
//! frame is register-class uniform; the CIF path prepares a libffi call
//! interface once per descriptor and reuses it. The probe in
//! [`DispatchStrategy::probe`] decides which hosts may take the direct
//! path at all.

mod cif;
mod direct;

use std::collections::hash_map::DefaultHasher;
use std::error::Error as StdError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::buffer::ArgBuffer;
use crate::descriptor::BuiltinTag;
use crate::platform::{Address, CallConvention, DispatchStrategy};

pub use cif::{CifCache, PreparedCif};
use direct::DirectShape;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A tag that cannot appear in this position.
    UnsupportedTag {
        tag: BuiltinTag,
        context: &'static str,
    },
    /// Frame length differs from the descriptor's parameter count.
    ArityMismatch { expected: usize, found: usize },
    /// A frame slot was written with a different tag than declared.
    TagMismatch {
        index: usize,
        expected: BuiltinTag,
        found: BuiltinTag,
    },
    /// Typed entry point used against a descriptor with another return tag.
    RetMismatch {
        expected: &'static str,
        found: BuiltinTag,
    },
    /// Call or stub against a null address.
    NullAddress,
    /// libffi rejected the call interface.
    CifPrep { status: &'static str },
    /// libffi could not allocate executable closure memory.
    ClosureAlloc,
    /// Symbol lookup through a handle that was already closed.
    LibraryClosed { path: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnsupportedTag { tag, context } => {
                write!(f, "tag `{tag}` is not usable as a {context}")
            }
            DispatchError::ArityMismatch { expected, found } => {
                write!(f, "descriptor expects {expected} arguments, frame holds {found}")
            }
            DispatchError::TagMismatch {
                index,
                expected,
                found,
            } => write!(
                f,
                "argument {index} declared `{expected}` but written as `{found}`"
            ),
            DispatchError::RetMismatch { expected, found } => {
                write!(f, "typed call expects a `{expected}` return, descriptor says `{found}`")
            }
            DispatchError::NullAddress => write!(f, "dispatch against a null address"),
            DispatchError::CifPrep { status } => {
                write!(f, "libffi call interface preparation failed: {status}")
            }
            DispatchError::ClosureAlloc => {
                write!(f, "libffi closure allocation failed")
            }
            DispatchError::LibraryClosed { path } => {
                write!(f, "symbol lookup on closed library `{path}`")
            }
        }
    }
}

impl StdError for DispatchError {}

/// The native shape of a foreign call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallDescriptor {
    ret: BuiltinTag,
    params: Vec<BuiltinTag>,
    convention: CallConvention,
}

impl CallDescriptor {
    #[must_use]
    pub fn ret(&self) -> BuiltinTag {
        self.ret
    }

    #[must_use]
    pub fn params(&self) -> &[BuiltinTag] {
        &self.params
    }

    #[must_use]
    pub fn convention(&self) -> CallConvention {
        self.convention
    }
}

/// Interning cache for call descriptors.
///
/// Buckets are keyed by a derived hash; each bucket is scanned for
/// structural equality, so two equal requests always resolve to the same
/// `Arc` and pointer identity can stand in for structural comparison
/// downstream.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    buckets: DashMap<u64, Vec<Arc<CallDescriptor>>>,
}

impl DescriptorCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(
        &self,
        ret: BuiltinTag,
        params: &[BuiltinTag],
        convention: CallConvention,
    ) -> Result<Arc<CallDescriptor>, DispatchError> {
        for &param in params {
            if param == BuiltinTag::Void {
                return Err(DispatchError::UnsupportedTag {
                    tag: param,
                    context: "parameter",
                });
            }
        }
        let probe = CallDescriptor {
            ret,
            params: params.to_vec(),
            convention,
        };
        let mut hasher = DefaultHasher::new();
        probe.hash(&mut hasher);
        let mut bucket = self.buckets.entry(hasher.finish()).or_default();
        if let Some(found) = bucket.iter().find(|cached| ***cached == probe) {
            return Ok(Arc::clone(found));
        }
        let interned = Arc::new(probe);
        bucket.push(Arc::clone(&interned));
        Ok(interned)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives foreign calls under the process dispatch strategy.
#[derive(Debug)]
pub struct Dispatcher {
    strategy: DispatchStrategy,
    cifs: CifCache,
    // Direct-shape classification per interned descriptor.
    shapes: DashMap<usize, Option<DirectShape>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(strategy: DispatchStrategy) -> Self {
        Self {
            strategy,
            cifs: CifCache::default(),
            shapes: DashMap::new(),
        }
    }

    #[must_use]
    pub fn strategy(&self) -> DispatchStrategy {
        self.strategy
    }

    /// Invoke `address` with the frame, returning the widened register
    /// image of the result. Float results are stored as their bit
    /// patterns; the typed entry points below recover the value.
    ///
    /// # Safety
    ///
    /// `address` must be the entry of a function matching the descriptor's
    /// shape under its calling convention, loaded and executable for the
    /// life of the call.
    pub unsafe fn call(
        &self,
        address: Address,
        descriptor: &Arc<CallDescriptor>,
        frame: &mut ArgBuffer,
    ) -> Result<u64, DispatchError> {
        if address.is_null() {
            return Err(DispatchError::NullAddress);
        }
        check_frame(descriptor, frame)?;
        if self.strategy == DispatchStrategy::Direct {
            let key = Arc::as_ptr(descriptor) as usize;
            let shape = *self
                .shapes
                .entry(key)
                .or_insert_with(|| direct::shape(descriptor));
            if let Some(shape) = shape {
                trace!(%address, arity = frame.len(), "direct downcall");
                return Ok(direct::call(shape, address, descriptor.ret(), frame));
            }
        }
        let prepared = self.cifs.get_or_prepare(descriptor)?;
        let mut args = frame.arg_ptrs();
        trace!(%address, arity = args.len(), "cif downcall");
        Ok(prepared.call(address, &mut args))
    }

    /// # Safety
    ///
    /// See [`Dispatcher::call`].
    pub unsafe fn call_unit(
        &self,
        address: Address,
        descriptor: &Arc<CallDescriptor>,
        frame: &mut ArgBuffer,
    ) -> Result<(), DispatchError> {
        expect_ret(descriptor, BuiltinTag::Void, "void")?;
        self.call(address, descriptor, frame).map(|_| ())
    }

    /// # Safety
    ///
    /// See [`Dispatcher::call`].
    pub unsafe fn call_f32(
        &self,
        address: Address,
        descriptor: &Arc<CallDescriptor>,
        frame: &mut ArgBuffer,
    ) -> Result<f32, DispatchError> {
        expect_ret(descriptor, BuiltinTag::Float, "float")?;
        self.call(address, descriptor, frame)
            .map(|bits| f32::from_bits(bits as u32))
    }

    /// # Safety
    ///
    /// See [`Dispatcher::call`].
    pub unsafe fn call_f64(
        &self,
        address: Address,
        descriptor: &Arc<CallDescriptor>,
        frame: &mut ArgBuffer,
    ) -> Result<f64, DispatchError> {
        expect_ret(descriptor, BuiltinTag::Double, "double")?;
        self.call(address, descriptor, frame).map(f64::from_bits)
    }

    /// # Safety
    ///
    /// See [`Dispatcher::call`].
    pub unsafe fn call_ptr(
        &self,
        address: Address,
        descriptor: &Arc<CallDescriptor>,
        frame: &mut ArgBuffer,
    ) -> Result<usize, DispatchError> {
        expect_ret(descriptor, BuiltinTag::Address, "address")?;
        self.call(address, descriptor, frame).map(|bits| bits as usize)
    }
}

macro_rules! typed_int_calls {
    ($(($method:ident, $ty:ty, $tag:ident, $name:literal)),+ $(,)?) => {
        impl Dispatcher {
            $(
                /// # Safety
                ///
                /// See [`Dispatcher::call`].
                pub unsafe fn $method(
                    &self,
                    address: Address,
                    descriptor: &Arc<CallDescriptor>,
                    frame: &mut ArgBuffer,
                ) -> Result<$ty, DispatchError> {
                    expect_ret(descriptor, BuiltinTag::$tag, $name)?;
                    self.call(address, descriptor, frame).map(|bits| bits as $ty)
                }
            )+
        }
    };
}

typed_int_calls! {
    (call_i8, i8, Byte, "byte"),
    (call_i16, i16, Short, "short"),
    (call_i32, i32, Int, "int"),
    (call_i64, i64, Long, "long"),
    (call_u8, u8, UByte, "ubyte"),
    (call_u16, u16, UShort, "ushort"),
    (call_u32, u32, UInt, "uint"),
    (call_u64, u64, ULong, "ulong"),
    (call_isize, isize, NativeInt, "nint"),
    (call_usize, usize, NativeUInt, "nuint"),
}

fn expect_ret(
    descriptor: &CallDescriptor,
    tag: BuiltinTag,
    name: &'static str,
) -> Result<(), DispatchError> {
    if descriptor.ret() == tag {
        Ok(())
    } else {
        Err(DispatchError::RetMismatch {
            expected: name,
            found: descriptor.ret(),
        })
    }
}

fn check_frame(descriptor: &CallDescriptor, frame: &ArgBuffer) -> Result<(), DispatchError> {
    let params = descriptor.params();
    if params.len() != frame.len() {
        return Err(DispatchError::ArityMismatch {
            expected: params.len(),
            found: frame.len(),
        });
    }
    for (index, (&expected, &found)) in params.iter().zip(frame.tags()).enumerate() {
        if expected != found {
            return Err(DispatchError::TagMismatch {
                index,
                expected,
                found,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let cache = DescriptorCache::new();
        let first = cache
            .intern(
                BuiltinTag::Int,
                &[BuiltinTag::Int, BuiltinTag::Int],
                CallConvention::C,
            )
            .unwrap();
        let second = cache
            .intern(
                BuiltinTag::Int,
                &[BuiltinTag::Int, BuiltinTag::Int],
                CallConvention::C,
            )
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_shapes_intern_separately() {
        let cache = DescriptorCache::new();
        let ints = cache
            .intern(BuiltinTag::Int, &[BuiltinTag::Int], CallConvention::C)
            .unwrap();
        let doubles = cache
            .intern(BuiltinTag::Double, &[BuiltinTag::Double], CallConvention::C)
            .unwrap();
        let system = cache
            .intern(BuiltinTag::Int, &[BuiltinTag::Int], CallConvention::System)
            .unwrap();
        assert!(!Arc::ptr_eq(&ints, &doubles));
        assert!(!Arc::ptr_eq(&ints, &system));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn void_parameters_are_rejected() {
        let cache = DescriptorCache::new();
        let err = cache
            .intern(BuiltinTag::Int, &[BuiltinTag::Void], CallConvention::C)
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnsupportedTag {
                tag: BuiltinTag::Void,
                context: "parameter"
            }
        );
    }

    #[test]
    fn frame_checks_catch_shape_drift() {
        let cache = DescriptorCache::new();
        let descriptor = cache
            .intern(BuiltinTag::Int, &[BuiltinTag::Int], CallConvention::C)
            .unwrap();
        let dispatcher = Dispatcher::new(DispatchStrategy::probe());

        let mut empty = ArgBuffer::new();
        let err = unsafe { dispatcher.call(Address(0x1000), &descriptor, &mut empty) }.unwrap_err();
        assert_eq!(err, DispatchError::ArityMismatch { expected: 1, found: 0 });

        let mut wrong = ArgBuffer::new();
        wrong.push_f64(1.0);
        let err = unsafe { dispatcher.call(Address(0x1000), &descriptor, &mut wrong) }.unwrap_err();
        assert_eq!(
            err,
            DispatchError::TagMismatch {
                index: 0,
                expected: BuiltinTag::Int,
                found: BuiltinTag::Double
            }
        );
    }

    #[test]
    fn null_addresses_never_dispatch() {
        let cache = DescriptorCache::new();
        let descriptor = cache
            .intern(BuiltinTag::Void, &[], CallConvention::C)
            .unwrap();
        let dispatcher = Dispatcher::new(DispatchStrategy::probe());
        let mut frame = ArgBuffer::new();
        let err = unsafe { dispatcher.call_unit(Address(0), &descriptor, &mut frame) }.unwrap_err();
        assert_eq!(err, DispatchError::NullAddress);
    }

    #[test]
    fn typed_calls_guard_the_return_tag() {
        let cache = DescriptorCache::new();
        let descriptor = cache
            .intern(BuiltinTag::Int, &[], CallConvention::C)
            .unwrap();
        let dispatcher = Dispatcher::new(DispatchStrategy::probe());
        let mut frame = ArgBuffer::new();
        let err = unsafe { dispatcher.call_f64(Address(0x1000), &descriptor, &mut frame) }
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::RetMismatch {
                expected: "double",
                found: BuiltinTag::Int
            }
        );
    }
}
