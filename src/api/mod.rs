//! The native context creation apis, one module per backend.

#[cfg(any(glx_backend, egl_backend))]
pub(crate) mod dlloader;

#[cfg(cgl_backend)]
pub(crate) mod cgl;
#[cfg(egl_backend)]
pub(crate) mod egl;
#[cfg(glx_backend)]
pub(crate) mod glx;
#[cfg(osmesa_backend)]
pub(crate) mod osmesa;
#[cfg(wgl_backend)]
pub(crate) mod wgl;
