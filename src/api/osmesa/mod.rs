//! OSMesa software rasterization into a plain memory buffer.
//!
//! The library is discovered at run time via dlopen; a missing or too-old
//! OSMesa (one without `OSMesaCreateContextAttribs`, i.e. pre-11.2 Mesa)
//! simply reports the backend as unavailable.
//!
//! The color buffer is always `OSMESA_RGBA`. OSMesa can rasterize into
//! other channel orders (BGRA, ARGB, RGB, BGR), but nothing reads the
//! buffer back through this api, so only the one every GL consumer
//! expects is wired up.

use std::ffi::CStr;
use std::fmt;
use std::os::raw::{c_int, c_void};
use std::ptr;

use log::warn;

use crate::config::{Candidate, ContextBuilder, GlProfile};
use crate::error::{Error, ErrorKind, Result};

pub(crate) struct Context {
    context: osmesa_sys::OSMesaContext,
    buffer: Vec<u32>,
    width: c_int,
    height: c_int,
}

unsafe impl Send for Context {}

impl Context {
    pub(crate) fn new(
        builder: &ContextBuilder<'_>,
        candidate: &Candidate,
        share: Option<&Context>,
    ) -> Result<Context> {
        osmesa_sys::OsMesa::try_loading().map_err(|err| {
            Error::with_message(
                ErrorKind::PlatformUnavailable,
                format!("failed to load the OSMesa library: {err:?}"),
            )
        })?;

        let mut attrs = Vec::<c_int>::with_capacity(12);

        attrs.push(osmesa_sys::OSMESA_FORMAT);
        attrs.push(osmesa_sys::OSMESA_RGBA as c_int);
        attrs.push(osmesa_sys::OSMESA_DEPTH_BITS);
        attrs.push(24);
        attrs.push(osmesa_sys::OSMESA_STENCIL_BITS);
        attrs.push(8);

        match candidate.profile {
            Some(GlProfile::Core) => {
                attrs.push(osmesa_sys::OSMESA_PROFILE);
                attrs.push(osmesa_sys::OSMESA_CORE_PROFILE);
            },
            Some(GlProfile::Compatibility) => {
                attrs.push(osmesa_sys::OSMESA_PROFILE);
                attrs.push(osmesa_sys::OSMESA_COMPAT_PROFILE);
            },
            Some(GlProfile::Es) => {
                return Err(
                    ErrorKind::NotSupported("OSMesa only provides desktop OpenGL").into()
                );
            },
            None => {},
        }

        if let Some(version) = candidate.version {
            attrs.push(osmesa_sys::OSMESA_CONTEXT_MAJOR_VERSION);
            attrs.push(version.major as c_int);
            attrs.push(osmesa_sys::OSMESA_CONTEXT_MINOR_VERSION);
            attrs.push(version.minor as c_int);
        }

        // The attribs array must be zero terminated.
        attrs.push(0);

        let share_context = share.map(|share| share.context).unwrap_or(ptr::null_mut());

        let context =
            unsafe { osmesa_sys::OSMesaCreateContextAttribs(attrs.as_ptr(), share_context) };
        if context.is_null() {
            let kind = if candidate.version.is_some() {
                ErrorKind::VersionUnsupported
            } else {
                ErrorKind::ContextCreationFailed
            };
            return Err(Error::with_message(kind, "OSMesaCreateContextAttribs failed"));
        }

        // Software backends need an explicit color buffer; there is no
        // window-system surface to render into. The dimensions were
        // validated to fit c_int by the factory, but the product only
        // fits usize.
        let (width, height) = builder.buffer_size();
        let buffer = vec![0u32; width as usize * height as usize];

        Ok(Context { context, buffer, width: width as c_int, height: height as c_int })
    }

    pub(crate) fn make_current(&self) -> Result<()> {
        let ret = unsafe {
            osmesa_sys::OSMesaMakeCurrent(
                self.context,
                self.buffer.as_ptr() as *mut _,
                // GL_UNSIGNED_BYTE.
                0x1401,
                self.width,
                self.height,
            )
        };

        if ret == 0 {
            return Err(ErrorKind::MakeCurrentFailed.into());
        }
        Ok(())
    }

    pub(crate) fn release_current(&self) -> Result<()> {
        unsafe {
            if osmesa_sys::OSMesaGetCurrentContext() == self.context {
                // Unbinding with a null context is rejected by the gallium
                // drivers; the context stays natively bound there until the
                // next make_current or the teardown.
                let ret = osmesa_sys::OSMesaMakeCurrent(ptr::null_mut(), ptr::null_mut(), 0, 0, 0);
                if ret == 0 {
                    warn!("OSMesaMakeCurrent(NULL) is not supported by this driver");
                }
            }
        }
        Ok(())
    }

    pub(crate) fn get_proc_address(&self, symbol: &CStr) -> *const c_void {
        unsafe {
            let proc_address = osmesa_sys::OSMesaGetProcAddress(symbol.as_ptr() as *const _);
            std::mem::transmute(proc_address)
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { osmesa_sys::OSMesaDestroyContext(self.context) }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("context", &self.context)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}
