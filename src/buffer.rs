//! Argument and result marshaling buffers.
//!
//! Outgoing arguments live in fixed eight-byte slots. Each typed write
//! stores the value at the start of its slot, which is exactly where a
//! libffi argument pointer must point, and the raw slot doubles as the
//! full-width register image the direct dispatch path passes. Slots are
//! reusable across calls through [`ArgBuffer::rewind`].

use std::ffi::c_void;

use crate::descriptor::BuiltinTag;

/// Outgoing argument frame.
#[derive(Debug, Default)]
pub struct ArgBuffer {
    slots: Vec<u64>,
    tags: Vec<BuiltinTag>,
}

macro_rules! push_typed {
    ($(($method:ident, $ty:ty, $tag:ident)),+ $(,)?) => {
        $(
            pub fn $method(&mut self, value: $ty) {
                let slot = self.push_slot(BuiltinTag::$tag);
                // The slot is freshly pushed, 8-byte aligned and at least
                // as large as the value.
                unsafe { (slot as *mut $ty).write(value) };
            }
        )+
    };
}

impl ArgBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(args: usize) -> Self {
        Self {
            slots: Vec::with_capacity(args),
            tags: Vec::with_capacity(args),
        }
    }

    fn push_slot(&mut self, tag: BuiltinTag) -> *mut u8 {
        self.slots.push(0);
        self.tags.push(tag);
        let index = self.slots.len() - 1;
        self.slots[index..].as_mut_ptr().cast()
    }

    push_typed! {
        (push_i8, i8, Byte),
        (push_i16, i16, Short),
        (push_i32, i32, Int),
        (push_i64, i64, Long),
        (push_u8, u8, UByte),
        (push_u16, u16, UShort),
        (push_u32, u32, UInt),
        (push_u64, u64, ULong),
        (push_f32, f32, Float),
        (push_f64, f64, Double),
    }

    pub fn push_isize(&mut self, value: isize) {
        let slot = self.push_slot(BuiltinTag::NativeInt);
        unsafe { (slot as *mut isize).write(value) };
    }

    pub fn push_usize(&mut self, value: usize) {
        let slot = self.push_slot(BuiltinTag::NativeUInt);
        unsafe { (slot as *mut usize).write(value) };
    }

    /// Push a raw address argument.
    pub fn push_address(&mut self, value: usize) {
        let slot = self.push_slot(BuiltinTag::Address);
        unsafe { (slot as *mut usize).write(value) };
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    #[must_use]
    pub fn tags(&self) -> &[BuiltinTag] {
        &self.tags
    }

    /// Raw register image of slot `index`.
    #[must_use]
    pub fn slot_bits(&self, index: usize) -> u64 {
        self.slots[index]
    }

    /// Per-argument value pointers in call order, one per slot.
    #[must_use]
    pub fn arg_ptrs(&mut self) -> Vec<*mut c_void> {
        self.slots
            .iter_mut()
            .map(|slot| (slot as *mut u64).cast())
            .collect()
    }

    /// Clear the frame for reuse; capacity is kept.
    pub fn rewind(&mut self) {
        self.slots.clear();
        self.tags.clear();
    }
}

/// Incoming argument view inside an upcall.
///
/// Wraps the per-argument value pointers libffi hands a closure. Each
/// pointer refers to a value of the corresponding parameter's native type.
pub struct ArgReader<'a> {
    args: *const *const c_void,
    tags: &'a [BuiltinTag],
}

macro_rules! read_typed {
    ($(($method:ident, $ty:ty)),+ $(,)?) => {
        $(
            #[must_use]
            pub fn $method(&self, index: usize) -> Option<$ty> {
                self.arg_ptr(index)
                    .map(|ptr| unsafe { (ptr as *const $ty).read() })
            }
        )+
    };
}

impl<'a> ArgReader<'a> {
    /// # Safety
    ///
    /// `args` must point at `tags.len()` valid argument value pointers,
    /// each referring to a live value of the tagged type. libffi upholds
    /// this for the duration of a closure invocation.
    #[must_use]
    pub unsafe fn new(args: *const *const c_void, tags: &'a [BuiltinTag]) -> Self {
        Self { args, tags }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    #[must_use]
    pub fn tag(&self, index: usize) -> Option<BuiltinTag> {
        self.tags.get(index).copied()
    }

    fn arg_ptr(&self, index: usize) -> Option<*const c_void> {
        if index < self.tags.len() {
            Some(unsafe { *self.args.add(index) })
        } else {
            None
        }
    }

    read_typed! {
        (i8_at, i8),
        (i16_at, i16),
        (i32_at, i32),
        (i64_at, i64),
        (u8_at, u8),
        (u16_at, u16),
        (u32_at, u32),
        (u64_at, u64),
        (f32_at, f32),
        (f64_at, f64),
        (isize_at, isize),
        (usize_at, usize),
    }

    /// Read a raw address argument.
    #[must_use]
    pub fn address_at(&self, index: usize) -> Option<usize> {
        self.usize_at(index)
    }
}

/// Result cell an upcall handler writes into.
///
/// Integral results are kept widened to a full register, matching what
/// libffi expects a closure to store for small return types.
#[derive(Debug)]
pub struct ResultSlot {
    bits: u64,
    tag: BuiltinTag,
    written: bool,
}

macro_rules! write_int {
    ($(($method:ident, $ty:ty)),+ $(,)?) => {
        $(
            pub fn $method(&mut self, value: $ty) {
                // Sign extension through i64 keeps negative values intact
                // in the widened register image.
                self.bits = value as i64 as u64;
                self.written = true;
            }
        )+
    };
}

impl ResultSlot {
    #[must_use]
    pub fn new(tag: BuiltinTag) -> Self {
        Self {
            bits: 0,
            tag,
            written: false,
        }
    }

    #[must_use]
    pub fn tag(&self) -> BuiltinTag {
        self.tag
    }

    #[must_use]
    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Widened register image of the result.
    #[must_use]
    pub fn bits(&self) -> u64 {
        self.bits
    }

    write_int! {
        (write_i8, i8),
        (write_i16, i16),
        (write_i32, i32),
        (write_i64, i64),
        (write_isize, isize),
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bits = u64::from(value);
        self.written = true;
    }

    pub fn write_u16(&mut self, value: u16) {
        self.bits = u64::from(value);
        self.written = true;
    }

    pub fn write_u32(&mut self, value: u32) {
        self.bits = u64::from(value);
        self.written = true;
    }

    pub fn write_u64(&mut self, value: u64) {
        self.bits = value;
        self.written = true;
    }

    pub fn write_usize(&mut self, value: usize) {
        self.bits = value as u64;
        self.written = true;
    }

    pub fn write_f32(&mut self, value: f32) {
        self.bits = u64::from(value.to_bits());
        self.written = true;
    }

    pub fn write_f64(&mut self, value: f64) {
        self.bits = value.to_bits();
        self.written = true;
    }

    pub fn write_address(&mut self, value: usize) {
        self.write_usize(value);
    }

    pub fn write_unit(&mut self) {
        self.bits = 0;
        self.written = true;
    }
}
