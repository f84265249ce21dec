//! Thin wrapper over the OS shared-library loader.
//!
//! The interop core only needs raw symbol addresses; everything typed
//! happens in the dispatcher. A missing library is an ordinary outcome
//! (`None`), a missing symbol likewise; using a closed handle is a
//! programming error and fails fast.

use std::ffi::c_void;

use tracing::debug;

use crate::dispatch::DispatchError;
use crate::platform::Address;

#[derive(Debug)]
pub struct SharedLibrary {
    inner: Option<libloading::Library>,
    path: String,
}

impl SharedLibrary {
    /// Try each candidate name in order; the first that loads wins.
    #[must_use]
    pub fn open(candidates: &[impl AsRef<str>]) -> Option<Self> {
        for candidate in candidates {
            let path = candidate.as_ref();
            match unsafe { libloading::Library::new(path) } {
                Ok(library) => {
                    debug!(%path, "shared library loaded");
                    return Some(Self {
                        inner: Some(library),
                        path: path.to_string(),
                    });
                }
                Err(error) => {
                    debug!(%path, %error, "shared library candidate rejected");
                }
            }
        }
        None
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Resolve `symbol` to its raw address.
    ///
    /// `Ok(None)` when the symbol is absent; `Err` when the handle was
    /// already closed.
    pub fn find(&self, symbol: &str) -> Result<Option<Address>, DispatchError> {
        let Some(library) = self.inner.as_ref() else {
            return Err(DispatchError::LibraryClosed {
                path: self.path.clone(),
            });
        };
        let found = unsafe { library.get::<*mut c_void>(symbol.as_bytes()) };
        match found {
            Ok(pointer) => {
                let address = Address(*pointer as usize);
                if address.is_null() {
                    Ok(None)
                } else {
                    Ok(Some(address))
                }
            }
            Err(_) => Ok(None),
        }
    }

    /// Unload now instead of at drop time.
    pub fn close(&mut self) {
        if let Some(library) = self.inner.take() {
            drop(library);
            debug!(path = %self.path, "shared library closed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_none() {
        assert!(SharedLibrary::open(&["libkwire-no-such-library.so"]).is_none());
        let empty: &[&str] = &[];
        assert!(SharedLibrary::open(empty).is_none());
    }

    #[test]
    fn find_on_a_closed_handle_fails_fast() {
        let candidates = ["libm.so.6", "libm.so", "libm.dylib"];
        let Some(mut library) = SharedLibrary::open(&candidates) else {
            return;
        };
        assert!(library.is_open());
        library.close();
        assert!(!library.is_open());
        let err = library.find("cos").unwrap_err();
        assert!(matches!(err, DispatchError::LibraryClosed { .. }));
    }

    #[test]
    fn absent_symbols_resolve_to_none() {
        let candidates = ["libm.so.6", "libm.so", "libm.dylib"];
        let Some(library) = SharedLibrary::open(&candidates) else {
            return;
        };
        assert!(library.find("cos").unwrap().is_some());
        assert!(library.find("kwire_definitely_absent").unwrap().is_none());
    }
}
