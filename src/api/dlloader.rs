//! Runtime loading of the native client libraries.

use std::ffi::CString;
use std::ops::{Deref, DerefMut};
use std::os::raw::c_void;
use std::sync::Arc;

use libloading::Library;

/// A generated function table together with the library it was loaded
/// from, so the symbols can't outlive their dylib.
#[derive(Clone)]
pub(crate) struct SymWrapper<T> {
    inner: T,
    _lib: Arc<Library>,
}

pub(crate) trait SymTrait {
    fn load_with<F>(lib: &Library, loadfn: F) -> Self
    where
        F: FnMut(&'static str) -> *const c_void;
}

impl<T: SymTrait> SymWrapper<T> {
    /// Try each candidate path in order; the first library that opens is
    /// used to resolve the whole table.
    pub(crate) fn new(lib_paths: &[&str]) -> Result<Self, ()> {
        for path in lib_paths {
            // The loaded symbols never outlive `_lib`.
            let lib = match unsafe { Library::new(path) } {
                Ok(lib) => lib,
                Err(_) => continue,
            };

            let inner = T::load_with(&lib, |sym| {
                let name = CString::new(sym.as_bytes()).unwrap();
                unsafe {
                    lib.get(name.as_bytes_with_nul())
                        .map(|sym| *sym)
                        .unwrap_or(std::ptr::null_mut())
                }
            });

            return Ok(SymWrapper { inner, _lib: Arc::new(lib) });
        }

        Err(())
    }
}

impl<T> Deref for SymWrapper<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for SymWrapper<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
