//! Upcall trampolines: native-callable entry points into managed code.
//!
//! Each stub is one executable libffi closure bound to the fixed entry
//! [`invoke_upcall_stub`], with a user-data record that names the handler
//! and the frame shape. The registry keys stubs by handler identity, so
//! handing the same handler out twice yields the same native address.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use dashmap::DashMap;
use libffi::low::{self, ffi_cif};
use libffi::raw;
use tracing::{debug, warn};

use crate::buffer::{ArgReader, ResultSlot};
use crate::descriptor::BuiltinTag;
use crate::dispatch::{CallDescriptor, DispatchError, PreparedCif};
use crate::platform::Address;

/// A managed handler invocable from native code.
///
/// Invocation may arrive on any thread the native side owns, including
/// reentrantly while a downcall is in flight.
pub trait UpcallHandler: Fn(&ArgReader<'_>, &mut ResultSlot) + Send + Sync {}

impl<F> UpcallHandler for F where F: Fn(&ArgReader<'_>, &mut ResultSlot) + Send + Sync {}

/// User-data record the closure entry resolves its target from.
struct StubData {
    handler: Arc<dyn UpcallHandler>,
    ret: BuiltinTag,
    params: Vec<BuiltinTag>,
}

/// One live trampoline.
///
/// Field order is load-bearing for teardown: the closure is freed in
/// `Drop` before the interface and the user-data record it points into
/// are released.
pub struct UpcallStub {
    address: Address,
    closure: *mut low::ffi_closure,
    interface: Box<PreparedCif>,
    data: Box<StubData>,
}

// The raw closure pointer is only freed once, under exclusive access in
// Drop; everything else the stub holds is Send + Sync.
unsafe impl Send for UpcallStub {}
unsafe impl Sync for UpcallStub {}

impl UpcallStub {
    fn create(
        descriptor: &CallDescriptor,
        handler: Arc<dyn UpcallHandler>,
    ) -> Result<Self, DispatchError> {
        let interface = Box::new(PreparedCif::prepare(descriptor)?);
        let data = Box::new(StubData {
            handler,
            ret: descriptor.ret(),
            params: descriptor.params().to_vec(),
        });
        let (closure, code) = low::closure_alloc();
        if closure.is_null() {
            return Err(DispatchError::ClosureAlloc);
        }
        let prepped = unsafe {
            low::prep_closure(
                closure,
                interface.cif_ptr(),
                invoke_upcall_stub,
                ptr::addr_of!(*data),
                code,
            )
        };
        if let Err(error) = prepped {
            unsafe { low::closure_free(closure) };
            return Err(DispatchError::CifPrep {
                status: match error {
                    low::Error::Typedef => "bad type definition",
                    low::Error::Abi => "bad ABI",
                },
            });
        }
        Ok(Self {
            address: Address(code.0 as usize),
            closure,
            interface,
            data,
        })
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.data.params.len()
    }
}

impl Drop for UpcallStub {
    fn drop(&mut self) {
        if !self.closure.is_null() {
            unsafe { low::closure_free(self.closure) };
            self.closure = ptr::null_mut();
        }
    }
}

impl std::fmt::Debug for UpcallStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpcallStub")
            .field("address", &self.address)
            .field("ret", &self.data.ret)
            .field("arity", &self.data.params.len())
            .finish()
    }
}

/// The fixed entry every trampoline lands on.
///
/// Panics in the handler are caught here; an unwound frame returns a
/// zeroed result rather than crossing the native boundary.
unsafe extern "C" fn invoke_upcall_stub(
    _cif: &ffi_cif,
    result: &mut u64,
    args: *const *const c_void,
    userdata: &StubData,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let reader = ArgReader::new(args, &userdata.params);
        let mut slot = ResultSlot::new(userdata.ret);
        (*userdata.handler)(&reader, &mut slot);
        slot.bits()
    }));
    let bits = match outcome {
        Ok(bits) => bits,
        Err(_) => {
            warn!(ret = %userdata.ret, "upcall handler panicked, returning zeroed result");
            0
        }
    };
    store_result(userdata.ret, result, bits);
}

/// Store the handler's widened result the way libffi expects a closure
/// to: integrals narrower than `ffi_arg` widened, floats and 8-byte
/// integers typed at the slot start (`ffi_arg` is 4 bytes on 32-bit
/// hosts and would truncate them).
fn store_result(ret: BuiltinTag, result: &mut u64, bits: u64) {
    let ptr = (result as *mut u64).cast::<c_void>();
    unsafe {
        match ret {
            BuiltinTag::Void => {}
            BuiltinTag::Float => ptr.cast::<f32>().write(f32::from_bits(bits as u32)),
            BuiltinTag::Double => ptr.cast::<f64>().write(f64::from_bits(bits)),
            #[cfg(target_pointer_width = "64")]
            BuiltinTag::NativeFloat => ptr.cast::<f64>().write(f64::from_bits(bits)),
            #[cfg(not(target_pointer_width = "64"))]
            BuiltinTag::NativeFloat => ptr.cast::<f32>().write(f32::from_bits(bits as u32)),
            BuiltinTag::Address => ptr.cast::<usize>().write(bits as usize),
            BuiltinTag::Long | BuiltinTag::ULong => ptr.cast::<u64>().write(bits),
            #[cfg(target_pointer_width = "64")]
            BuiltinTag::NativeInt | BuiltinTag::NativeUInt => ptr.cast::<u64>().write(bits),
            _ => ptr.cast::<raw::ffi_arg>().write(bits as raw::ffi_arg),
        }
    }
}

/// Owns every live trampoline, keyed by handler identity.
#[derive(Debug, Default)]
pub struct UpcallRegistry {
    stubs: DashMap<usize, Arc<UpcallStub>>,
}

impl UpcallRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the trampoline for `handler` under `descriptor`.
    ///
    /// Same handler, same address; a lost creation race frees the extra
    /// closure immediately.
    pub fn stub(
        &self,
        descriptor: &Arc<CallDescriptor>,
        handler: Arc<dyn UpcallHandler>,
    ) -> Result<Address, DispatchError> {
        let key = Arc::as_ptr(&handler) as *const () as usize;
        if let Some(existing) = self.stubs.get(&key) {
            return Ok(existing.address());
        }
        let stub = Arc::new(UpcallStub::create(descriptor, handler)?);
        let entry = self.stubs.entry(key).or_insert_with(|| Arc::clone(&stub));
        let address = entry.address();
        debug!(%address, arity = entry.arity(), "upcall stub ready");
        Ok(address)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Tear down every stub. Addresses handed out before this call must
    /// not be invoked afterwards.
    pub fn shutdown(&self) {
        let count = self.stubs.len();
        self.stubs.clear();
        if count > 0 {
            debug!(count, "upcall registry shut down");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dispatch::DescriptorCache;
    use crate::platform::CallConvention;

    fn int_binop_descriptor(cache: &DescriptorCache) -> Arc<CallDescriptor> {
        cache
            .intern(
                BuiltinTag::Int,
                &[BuiltinTag::Int, BuiltinTag::Int],
                CallConvention::C,
            )
            .unwrap()
    }

    fn adding_handler() -> Arc<dyn UpcallHandler> {
        Arc::new(|args: &ArgReader<'_>, out: &mut ResultSlot| {
            let a = args.i32_at(0).unwrap_or(0);
            let b = args.i32_at(1).unwrap_or(0);
            out.write_i32(a + b);
        })
    }

    #[test]
    fn same_handler_maps_to_one_address() {
        let cache = DescriptorCache::new();
        let descriptor = int_binop_descriptor(&cache);
        let registry = UpcallRegistry::new();
        let handler = adding_handler();
        let first = registry.stub(&descriptor, Arc::clone(&handler)).unwrap();
        let second = registry.stub(&descriptor, handler).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_handlers_get_distinct_addresses() {
        let cache = DescriptorCache::new();
        let descriptor = int_binop_descriptor(&cache);
        let registry = UpcallRegistry::new();
        let first = registry.stub(&descriptor, adding_handler()).unwrap();
        let second = registry.stub(&descriptor, adding_handler()).unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn native_code_can_call_through_the_stub() {
        let cache = DescriptorCache::new();
        let descriptor = int_binop_descriptor(&cache);
        let registry = UpcallRegistry::new();
        let address = registry.stub(&descriptor, adding_handler()).unwrap();
        let entry: extern "C" fn(i32, i32) -> i32 =
            unsafe { std::mem::transmute(address.0) };
        assert_eq!(entry(19, 23), 42);
        assert_eq!(entry(-5, 5), 0);
        registry.shutdown();
        assert!(registry.is_empty());
    }

    #[test]
    fn eight_byte_upcall_results_keep_their_high_bits() {
        let cache = DescriptorCache::new();
        let descriptor = cache
            .intern(BuiltinTag::Long, &[], CallConvention::C)
            .unwrap();
        let registry = UpcallRegistry::new();
        let handler: Arc<dyn UpcallHandler> =
            Arc::new(|_: &ArgReader<'_>, out: &mut ResultSlot| {
                out.write_i64(-0x1234_5678_9abc_def0);
            });
        let address = registry.stub(&descriptor, handler).unwrap();
        let entry: extern "C" fn() -> i64 = unsafe { std::mem::transmute(address.0) };
        assert_eq!(entry(), -0x1234_5678_9abc_def0);
    }

    #[test]
    fn panicking_handlers_return_zero() {
        let cache = DescriptorCache::new();
        let descriptor = int_binop_descriptor(&cache);
        let registry = UpcallRegistry::new();
        let handler: Arc<dyn UpcallHandler> =
            Arc::new(|_: &ArgReader<'_>, _: &mut ResultSlot| panic!("handler bug"));
        let address = registry.stub(&descriptor, handler).unwrap();
        let entry: extern "C" fn(i32, i32) -> i32 =
            unsafe { std::mem::transmute(address.0) };
        assert_eq!(entry(1, 2), 0);
    }
}
