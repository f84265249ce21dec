//! CIF-backed calls through libffi.

use std::ffi::c_void;
use std::ptr::addr_of_mut;
use std::sync::Arc;

use dashmap::DashMap;
use libffi::low::{self, ffi_abi_FFI_DEFAULT_ABI, ffi_cif, ffi_type, types};
use libffi::raw;

use crate::descriptor::BuiltinTag;
use crate::platform::Address;

use super::{CallDescriptor, DispatchError};

/// The libffi type describing a scalar tag on this host.
pub(crate) fn ffi_type_of(tag: BuiltinTag) -> *mut ffi_type {
    unsafe {
        match tag {
            BuiltinTag::Void => addr_of_mut!(types::void),
            BuiltinTag::Byte => addr_of_mut!(types::sint8),
            BuiltinTag::Short => addr_of_mut!(types::sint16),
            BuiltinTag::Int => addr_of_mut!(types::sint32),
            BuiltinTag::Long => addr_of_mut!(types::sint64),
            BuiltinTag::UByte => addr_of_mut!(types::uint8),
            BuiltinTag::UShort => addr_of_mut!(types::uint16),
            BuiltinTag::UInt => addr_of_mut!(types::uint32),
            BuiltinTag::ULong => addr_of_mut!(types::uint64),
            #[cfg(target_pointer_width = "64")]
            BuiltinTag::NativeInt => addr_of_mut!(types::sint64),
            #[cfg(not(target_pointer_width = "64"))]
            BuiltinTag::NativeInt => addr_of_mut!(types::sint32),
            #[cfg(target_pointer_width = "64")]
            BuiltinTag::NativeUInt => addr_of_mut!(types::uint64),
            #[cfg(not(target_pointer_width = "64"))]
            BuiltinTag::NativeUInt => addr_of_mut!(types::uint32),
            BuiltinTag::Float => addr_of_mut!(types::float),
            BuiltinTag::Double => addr_of_mut!(types::double),
            #[cfg(target_pointer_width = "64")]
            BuiltinTag::NativeFloat => addr_of_mut!(types::double),
            #[cfg(not(target_pointer_width = "64"))]
            BuiltinTag::NativeFloat => addr_of_mut!(types::float),
            BuiltinTag::Address => addr_of_mut!(types::pointer),
        }
    }
}

fn status_text(error: low::Error) -> &'static str {
    match error {
        low::Error::Typedef => "bad type definition",
        low::Error::Abi => "bad ABI",
    }
}

/// A prepared libffi call interface for one descriptor.
///
/// `arg_types` owns the array the cif points into, so the value can move
/// freely after preparation; the array's heap buffer stays put.
pub struct PreparedCif {
    cif: ffi_cif,
    ret: BuiltinTag,
    arg_types: Vec<*mut ffi_type>,
}

// The cif only references the owned arg_types buffer and static type
// records; invocation takes no interior mutability.
unsafe impl Send for PreparedCif {}
unsafe impl Sync for PreparedCif {}

impl std::fmt::Debug for PreparedCif {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCif")
            .field("ret", &self.ret)
            .field("arity", &self.arg_types.len())
            .finish()
    }
}

impl PreparedCif {
    pub fn prepare(descriptor: &CallDescriptor) -> Result<Self, DispatchError> {
        let mut arg_types: Vec<*mut ffi_type> = descriptor
            .params()
            .iter()
            .map(|&tag| ffi_type_of(tag))
            .collect();
        let mut cif = ffi_cif::default();
        unsafe {
            low::prep_cif(
                &mut cif,
                ffi_abi_FFI_DEFAULT_ABI,
                arg_types.len(),
                ffi_type_of(descriptor.ret()),
                arg_types.as_mut_ptr(),
            )
        }
        .map_err(|error| DispatchError::CifPrep {
            status: status_text(error),
        })?;
        Ok(Self {
            cif,
            ret: descriptor.ret(),
            arg_types,
        })
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.arg_types.len()
    }

    pub(crate) fn cif_ptr(&self) -> *mut ffi_cif {
        &self.cif as *const ffi_cif as *mut ffi_cif
    }

    /// Drive the call, returning the widened register image of the result.
    ///
    /// # Safety
    ///
    /// `address` must match this interface's shape and `args` must hold
    /// one valid value pointer per parameter.
    pub unsafe fn call(&self, address: Address, args: &mut [*mut c_void]) -> u64 {
        debug_assert_eq!(args.len(), self.arg_types.len());
        // libffi widens integral results narrower than ffi_arg and stores
        // floats and 8-byte integers at their own width; an 8-byte zeroed
        // slot covers every scalar.
        let mut result = 0u64;
        raw::ffi_call(
            self.cif_ptr(),
            Some(std::mem::transmute::<usize, unsafe extern "C" fn()>(
                address.0,
            )),
            (&mut result as *mut u64).cast::<c_void>(),
            args.as_mut_ptr(),
        );
        normalize_result(self.ret, &result)
    }
}

/// Read the raw result slot back as a uniform register image: signed
/// integers sign-extended, unsigned zero-extended, floats as bit patterns.
///
/// libffi widens only integral results narrower than `ffi_arg`; 8-byte
/// integers occupy the slot in full, so they are read at their own width
/// (on 32-bit hosts `ffi_arg` is 4 bytes and would truncate them).
fn normalize_result(ret: BuiltinTag, slot: &u64) -> u64 {
    let ptr = (slot as *const u64).cast::<c_void>();
    unsafe {
        match ret {
            BuiltinTag::Void => 0,
            BuiltinTag::Float => u64::from(ptr.cast::<f32>().read().to_bits()),
            BuiltinTag::Double => ptr.cast::<f64>().read().to_bits(),
            #[cfg(target_pointer_width = "64")]
            BuiltinTag::NativeFloat => ptr.cast::<f64>().read().to_bits(),
            #[cfg(not(target_pointer_width = "64"))]
            BuiltinTag::NativeFloat => u64::from(ptr.cast::<f32>().read().to_bits()),
            BuiltinTag::Byte | BuiltinTag::Short | BuiltinTag::Int => {
                ptr.cast::<raw::ffi_sarg>().read() as i64 as u64
            }
            BuiltinTag::UByte | BuiltinTag::UShort | BuiltinTag::UInt => {
                ptr.cast::<raw::ffi_arg>().read() as u64
            }
            BuiltinTag::Long => ptr.cast::<i64>().read() as u64,
            BuiltinTag::ULong => ptr.cast::<u64>().read(),
            #[cfg(target_pointer_width = "64")]
            BuiltinTag::NativeInt => ptr.cast::<i64>().read() as u64,
            #[cfg(not(target_pointer_width = "64"))]
            BuiltinTag::NativeInt => ptr.cast::<raw::ffi_sarg>().read() as i64 as u64,
            #[cfg(target_pointer_width = "64")]
            BuiltinTag::NativeUInt => ptr.cast::<u64>().read(),
            #[cfg(not(target_pointer_width = "64"))]
            BuiltinTag::NativeUInt => ptr.cast::<raw::ffi_arg>().read() as u64,
            BuiltinTag::Address => ptr.cast::<usize>().read() as u64,
        }
    }
}

/// Prepared interfaces keyed by descriptor identity.
#[derive(Debug, Default)]
pub struct CifCache {
    entries: DashMap<usize, Arc<PreparedCif>>,
}

impl CifCache {
    pub fn get_or_prepare(
        &self,
        descriptor: &Arc<CallDescriptor>,
    ) -> Result<Arc<PreparedCif>, DispatchError> {
        let key = Arc::as_ptr(descriptor) as usize;
        if let Some(found) = self.entries.get(&key) {
            return Ok(Arc::clone(&found));
        }
        let prepared = Arc::new(PreparedCif::prepare(descriptor)?);
        Ok(Arc::clone(&self.entries.entry(key).or_insert(prepared)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
