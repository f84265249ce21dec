//! Direct downcalls by transmuting the target address.
//!
//! Sound only for register-class-uniform frames on hosts the strategy
//! probe admits: every argument travels in an integer register, or every
//! argument travels in a float register, with at most six of them. The
//! callee owns narrowing, so a full-width register image per argument is
//! always acceptable; results are re-narrowed here per the declared tag.

use std::mem::transmute;

use crate::buffer::ArgBuffer;
use crate::descriptor::BuiltinTag;
use crate::platform::Address;

use super::CallDescriptor;

const MAX_DIRECT_ARITY: usize = 6;

/// Register family a frame resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirectShape {
    IntFrame,
    FloatFrame,
}

/// Classify a descriptor, `None` when the frame must take the CIF path.
pub(crate) fn shape(descriptor: &CallDescriptor) -> Option<DirectShape> {
    let params = descriptor.params();
    if params.len() > MAX_DIRECT_ARITY {
        return None;
    }
    let ret = descriptor.ret();
    let ret_int = ret == BuiltinTag::Void || ret.is_integer_class();
    if ret_int && params.iter().all(|tag| tag.is_integer_class()) {
        return Some(DirectShape::IntFrame);
    }
    let ret_float = ret == BuiltinTag::Void || ret == BuiltinTag::Double;
    if ret_float && params.iter().all(|&tag| tag == BuiltinTag::Double) {
        return Some(DirectShape::FloatFrame);
    }
    None
}

macro_rules! arity_call {
    ($address:expr, $args:expr, $arg:ty, $ret:ty) => {
        match *$args {
            [] => transmute::<usize, unsafe extern "C" fn() -> $ret>($address)(),
            [a] => transmute::<usize, unsafe extern "C" fn($arg) -> $ret>($address)(a),
            [a, b] => transmute::<usize, unsafe extern "C" fn($arg, $arg) -> $ret>($address)(a, b),
            [a, b, c] => {
                transmute::<usize, unsafe extern "C" fn($arg, $arg, $arg) -> $ret>($address)(
                    a, b, c,
                )
            }
            [a, b, c, d] => transmute::<
                usize,
                unsafe extern "C" fn($arg, $arg, $arg, $arg) -> $ret,
            >($address)(a, b, c, d),
            [a, b, c, d, e] => transmute::<
                usize,
                unsafe extern "C" fn($arg, $arg, $arg, $arg, $arg) -> $ret,
            >($address)(a, b, c, d, e),
            [a, b, c, d, e, f] => transmute::<
                usize,
                unsafe extern "C" fn($arg, $arg, $arg, $arg, $arg, $arg) -> $ret,
            >($address)(a, b, c, d, e, f),
            _ => unreachable!("arity bounded by the shape probe"),
        }
    };
}

/// Drive a classified frame, returning the widened register image.
///
/// # Safety
///
/// Same contract as [`super::Dispatcher::call`]; additionally the shape
/// must have been produced by [`shape`] for this descriptor.
pub(crate) unsafe fn call(
    shape: DirectShape,
    address: Address,
    ret: BuiltinTag,
    frame: &ArgBuffer,
) -> u64 {
    match shape {
        DirectShape::IntFrame => {
            let args: Vec<u64> = (0..frame.len()).map(|i| frame.slot_bits(i)).collect();
            if ret == BuiltinTag::Void {
                arity_call!(address.0, args.as_slice(), u64, ());
                0
            } else {
                let raw = arity_call!(address.0, args.as_slice(), u64, u64);
                narrow_int(ret, raw)
            }
        }
        DirectShape::FloatFrame => {
            let args: Vec<f64> = (0..frame.len())
                .map(|i| f64::from_bits(frame.slot_bits(i)))
                .collect();
            if ret == BuiltinTag::Void {
                arity_call!(address.0, args.as_slice(), f64, ());
                0
            } else {
                arity_call!(address.0, args.as_slice(), f64, f64).to_bits()
            }
        }
    }
}

/// Re-narrow a raw integer register to the declared width, then widen it
/// back out with the declared signedness. The callee only defines the low
/// bits of its return register; everything above is noise.
fn narrow_int(ret: BuiltinTag, raw: u64) -> u64 {
    match ret {
        BuiltinTag::Byte => raw as u8 as i8 as i64 as u64,
        BuiltinTag::UByte => u64::from(raw as u8),
        BuiltinTag::Short => raw as u16 as i16 as i64 as u64,
        BuiltinTag::UShort => u64::from(raw as u16),
        BuiltinTag::Int => raw as u32 as i32 as i64 as u64,
        BuiltinTag::UInt => u64::from(raw as u32),
        BuiltinTag::NativeInt => raw as usize as isize as i64 as u64,
        BuiltinTag::NativeUInt | BuiltinTag::Address => (raw as usize) as u64,
        _ => raw,
    }
}
