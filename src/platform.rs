//! Platform probe for the interop core.
//!
//! Layout and dispatch are parametrized by the pointer width so that symbol
//! tables built for one width can be inspected on a host with another; the
//! dispatch strategy is resolved once per process from the host triple.

use std::fmt;

/// Width of a native pointer, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    Four,
    Eight,
}

impl PointerWidth {
    /// Pointer width of the running process.
    #[must_use]
    pub fn host() -> Self {
        if std::mem::size_of::<usize>() == 8 {
            PointerWidth::Eight
        } else {
            PointerWidth::Four
        }
    }

    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            PointerWidth::Four => 4,
            PointerWidth::Eight => 8,
        }
    }
}

impl fmt::Display for PointerWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes() * 8)
    }
}

/// Platform parameters resolved once and threaded through layout queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pointer_width: PointerWidth,
}

impl Platform {
    /// The platform of the running process.
    #[must_use]
    pub fn host() -> Self {
        Self {
            pointer_width: PointerWidth::host(),
        }
    }

    /// A platform with an explicit pointer width, for cross-layout queries.
    #[must_use]
    pub fn with_pointer_width(pointer_width: PointerWidth) -> Self {
        Self { pointer_width }
    }

    #[must_use]
    pub fn pointer_width(&self) -> PointerWidth {
        self.pointer_width
    }

    /// Pointer size in bytes.
    #[must_use]
    pub fn pointer_size(&self) -> usize {
        self.pointer_width.bytes()
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

/// Calling convention requested for a foreign call.
///
/// Both conventions lower to the default libffi ABI on every target the
/// direct path can select; the distinction only matters on 32-bit x86, which
/// always takes the CIF path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallConvention {
    #[default]
    C,
    System,
}

impl CallConvention {
    pub fn parse(spec: &str) -> Option<Self> {
        match spec.to_ascii_lowercase().as_str() {
            "c" | "cdecl" => Some(Self::C),
            "system" | "stdcall" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for CallConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CallConvention::C => "c",
            CallConvention::System => "system",
        };
        f.write_str(text)
    }
}

/// A raw native code or data address handed across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub usize);

impl Address {
    #[must_use]
    pub fn as_ptr(self) -> *const core::ffi::c_void {
        self.0 as *const core::ffi::c_void
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// How foreign frames are driven for the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStrategy {
    /// Transmute the target address to a concrete `extern "C"` shape for
    /// register-class-uniform frames; CIF remains the per-call fallback.
    Direct,
    /// Always drive calls through a prepared libffi call interface.
    Cif,
}

impl DispatchStrategy {
    /// Probe the host once at startup.
    ///
    /// Direct is only sound where integer arguments travel in full-width
    /// registers with caller-side truncation, which holds for the SysV and
    /// AAPCS64 ABIs and for x64 Windows. Everything else goes through CIF.
    #[must_use]
    pub fn probe() -> Self {
        if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
            DispatchStrategy::Direct
        } else {
            DispatchStrategy::Cif
        }
    }
}
