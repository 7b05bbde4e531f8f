//! GLX context creation over an X11 display, bound to a pbuffer drawable.

use std::ffi::{CStr, CString};
use std::fmt;
use std::ops::Deref;
use std::os::raw::{c_int, c_void};
use std::ptr;

use glutin_glx_sys::glx::types::{GLXContext, GLXFBConfig, GLXPbuffer};
use glutin_glx_sys::{glx, glx_extra};
use once_cell::sync::Lazy;
use x11_dl::xlib;

use crate::api::dlloader::{SymTrait, SymWrapper};
use crate::config::{Candidate, ContextBuilder, GlProfile};
use crate::error::{Error, ErrorKind, Result};

#[derive(Clone)]
pub(crate) struct Glx(SymWrapper<glx::Glx>);

/// Because `*const raw::c_void` doesn't implement `Sync`.
unsafe impl Sync for Glx {}
unsafe impl Send for Glx {}

impl SymTrait for glx::Glx {
    fn load_with<F>(_: &libloading::Library, loadfn: F) -> Self
    where
        F: FnMut(&'static str) -> *const c_void,
    {
        Self::load_with(loadfn)
    }
}

impl Glx {
    fn new() -> std::result::Result<Self, ()> {
        SymWrapper::new(&["libGL.so.1", "libGL.so"]).map(Glx)
    }
}

impl Deref for Glx {
    type Target = glx::Glx;

    fn deref(&self) -> &glx::Glx {
        &self.0
    }
}

pub(crate) struct GlxExtra(glx_extra::Glx);

/// Because `*const raw::c_void` doesn't implement `Sync`.
unsafe impl Sync for GlxExtra {}
unsafe impl Send for GlxExtra {}

impl Deref for GlxExtra {
    type Target = glx_extra::Glx;

    fn deref(&self) -> &glx_extra::Glx {
        &self.0
    }
}

static GLX: Lazy<Option<Glx>> = Lazy::new(|| Glx::new().ok());

static XLIB: Lazy<Option<xlib::Xlib>> = Lazy::new(|| xlib::Xlib::open().ok());

/// ARB/EXT entry points, resolved through `glXGetProcAddress`.
static GLX_EXTRA: Lazy<Option<GlxExtra>> = Lazy::new(|| {
    let glx = GLX.as_ref()?;
    Some(GlxExtra(glx_extra::Glx::load_with(|sym| {
        let sym = CString::new(sym.as_bytes()).unwrap();
        unsafe { glx.GetProcAddress(sym.as_ptr() as *const u8) as *const _ }
    })))
});

/// Errors from failed context creation arrive as X protocol errors, which
/// abort the process under the default handler. Creation runs with this
/// silent handler installed and inspects the returned pointer instead.
unsafe extern "C" fn silent_x_error(
    _display: *mut xlib::Display,
    _event: *mut xlib::XErrorEvent,
) -> c_int {
    0
}

pub(crate) struct Context {
    display: *mut xlib::Display,
    pbuffer: GLXPbuffer,
    context: GLXContext,
}

unsafe impl Send for Context {}

impl Context {
    pub(crate) fn new(
        builder: &ContextBuilder<'_>,
        candidate: &Candidate,
        share: Option<&Context>,
    ) -> Result<Context> {
        let xlib = XLIB.as_ref().ok_or_else(|| {
            Error::with_message(ErrorKind::PlatformUnavailable, "libX11 could not be loaded")
        })?;
        let glx = GLX.as_ref().ok_or_else(|| {
            Error::with_message(ErrorKind::PlatformUnavailable, "libGL could not be loaded")
        })?;

        unsafe {
            let display = (xlib.XOpenDisplay)(ptr::null());
            if display.is_null() {
                return Err(Error::with_message(
                    ErrorKind::PlatformUnavailable,
                    "XOpenDisplay failed; no X server to talk to",
                ));
            }

            // From here on every failure has to close the display again.
            match Self::create_on_display(xlib, glx, display, builder, candidate, share) {
                Ok(context) => Ok(context),
                Err(err) => {
                    (xlib.XCloseDisplay)(display);
                    Err(err)
                },
            }
        }
    }

    unsafe fn create_on_display(
        xlib: &xlib::Xlib,
        glx: &Glx,
        display: *mut xlib::Display,
        builder: &ContextBuilder<'_>,
        candidate: &Candidate,
        share: Option<&Context>,
    ) -> Result<Context> {
        let screen = (xlib.XDefaultScreen)(display);

        let config = choose_fbconfig(xlib, glx, display, screen)?;

        let (width, height) = builder.buffer_size();
        let pbuffer_attrs = [
            glx::PBUFFER_WIDTH as c_int,
            width as c_int,
            glx::PBUFFER_HEIGHT as c_int,
            height as c_int,
            // X11 `None` terminates the list.
            0,
        ];
        let pbuffer = glx.CreatePbuffer(display as *mut _, config, pbuffer_attrs.as_ptr());
        if pbuffer == 0 {
            return Err(Error::with_message(
                ErrorKind::ConfigurationUnsupported,
                "glXCreatePbuffer failed",
            ));
        }

        let share_context = share.map(|share| share.context).unwrap_or(ptr::null());

        let context =
            match create_context(xlib, glx, display, screen, config, candidate, share_context) {
                Ok(context) => context,
                Err(err) => {
                    glx.DestroyPbuffer(display as *mut _, pbuffer);
                    return Err(err);
                },
            };

        Ok(Context { display, pbuffer, context })
    }

    pub(crate) fn make_current(&self) -> Result<()> {
        let glx = GLX.as_ref().unwrap();
        let res = unsafe {
            glx.MakeContextCurrent(self.display as *mut _, self.pbuffer, self.pbuffer, self.context)
        };
        if res == 0 {
            return Err(ErrorKind::MakeCurrentFailed.into());
        }
        Ok(())
    }

    pub(crate) fn release_current(&self) -> Result<()> {
        let glx = GLX.as_ref().unwrap();
        let res =
            unsafe { glx.MakeContextCurrent(self.display as *mut _, 0, 0, ptr::null()) };
        if res == 0 {
            return Err(ErrorKind::MakeCurrentFailed.into());
        }
        Ok(())
    }

    pub(crate) fn get_proc_address(&self, symbol: &CStr) -> *const c_void {
        let glx = GLX.as_ref().unwrap();
        unsafe { glx.GetProcAddress(symbol.as_ptr() as *const u8) as *const _ }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let glx = GLX.as_ref().unwrap();
        let xlib = XLIB.as_ref().unwrap();
        unsafe {
            if glx.GetCurrentContext() == self.context {
                glx.MakeContextCurrent(self.display as *mut _, 0, 0, ptr::null());
            }
            glx.DestroyContext(self.display as *mut _, self.context);
            glx.DestroyPbuffer(self.display as *mut _, self.pbuffer);
            (xlib.XCloseDisplay)(self.display);
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("display", &self.display)
            .field("context", &self.context)
            .finish()
    }
}

unsafe fn choose_fbconfig(
    xlib: &xlib::Xlib,
    glx: &Glx,
    display: *mut xlib::Display,
    screen: c_int,
) -> Result<GLXFBConfig> {
    let descriptor = [
        glx::DRAWABLE_TYPE as c_int,
        glx::PBUFFER_BIT as c_int,
        glx::RENDER_TYPE as c_int,
        glx::RGBA_BIT as c_int,
        glx::RED_SIZE as c_int,
        8,
        glx::GREEN_SIZE as c_int,
        8,
        glx::BLUE_SIZE as c_int,
        8,
        glx::ALPHA_SIZE as c_int,
        8,
        glx::DEPTH_SIZE as c_int,
        24,
        glx::STENCIL_SIZE as c_int,
        8,
        glx::DOUBLEBUFFER as c_int,
        0,
        0,
    ];

    let mut num_configs = 0;
    let configs =
        glx.ChooseFBConfig(display as *mut _, screen, descriptor.as_ptr(), &mut num_configs);
    if configs.is_null() || num_configs == 0 {
        if !configs.is_null() {
            (xlib.XFree)(configs as *mut _);
        }
        return Err(Error::with_message(
            ErrorKind::ConfigurationUnsupported,
            "no pbuffer-capable GLXFBConfig matched",
        ));
    }

    let config = *configs;
    (xlib.XFree)(configs as *mut _);
    Ok(config)
}

unsafe fn create_context(
    xlib: &xlib::Xlib,
    glx: &Glx,
    display: *mut xlib::Display,
    screen: c_int,
    config: GLXFBConfig,
    candidate: &Candidate,
    share: GLXContext,
) -> Result<GLXContext> {
    let extensions = glx.QueryExtensionsString(display as *mut _, screen);
    let has_arb = !extensions.is_null()
        && CStr::from_ptr(extensions)
            .to_str()
            .map_or(false, |extensions| {
                extensions.split(' ').any(|ext| ext == "GLX_ARB_create_context")
            });

    // Driver errors surface as X protocol errors during the create call;
    // swallow them and go by the returned pointer.
    let old_handler = (xlib.XSetErrorHandler)(Some(silent_x_error));

    let context = match candidate.version {
        Some(version) => {
            if !has_arb {
                (xlib.XSetErrorHandler)(old_handler);
                return Err(Error::with_message(
                    ErrorKind::VersionUnsupported,
                    "GLX_ARB_create_context is not advertised",
                ));
            }

            let extra = GLX_EXTRA.as_ref().unwrap();
            let mut attrs = Vec::<c_int>::with_capacity(8);

            attrs.push(glx_extra::CONTEXT_MAJOR_VERSION_ARB as c_int);
            attrs.push(version.major as c_int);
            attrs.push(glx_extra::CONTEXT_MINOR_VERSION_ARB as c_int);
            attrs.push(version.minor as c_int);

            match candidate.profile {
                Some(GlProfile::Core) => {
                    attrs.push(glx_extra::CONTEXT_PROFILE_MASK_ARB as c_int);
                    attrs.push(glx_extra::CONTEXT_CORE_PROFILE_BIT_ARB as c_int);
                },
                Some(GlProfile::Compatibility) => {
                    attrs.push(glx_extra::CONTEXT_PROFILE_MASK_ARB as c_int);
                    attrs.push(glx_extra::CONTEXT_COMPATIBILITY_PROFILE_BIT_ARB as c_int);
                },
                Some(GlProfile::Es) => {
                    let has_es = CStr::from_ptr(extensions).to_str().map_or(false, |s| {
                        s.split(' ').any(|ext| ext == "GLX_EXT_create_context_es2_profile")
                    });
                    if !has_es {
                        (xlib.XSetErrorHandler)(old_handler);
                        return Err(ErrorKind::NotSupported(
                            "GLX_EXT_create_context_es2_profile is not advertised",
                        )
                        .into());
                    }
                    attrs.push(glx_extra::CONTEXT_PROFILE_MASK_ARB as c_int);
                    attrs.push(glx_extra::CONTEXT_ES2_PROFILE_BIT_EXT as c_int);
                },
                None => {},
            }

            attrs.push(0);

            extra.CreateContextAttribsARB(
                display as *mut _,
                config,
                share,
                1,
                attrs.as_ptr(),
            )
        },
        // Legacy last-resort candidate.
        None => glx.CreateNewContext(display as *mut _, config, glx::RGBA_TYPE as c_int, share, 1),
    };

    // Flush any pending error before restoring the real handler.
    (xlib.XSync)(display, 0);
    (xlib.XSetErrorHandler)(old_handler);

    if context.is_null() {
        let kind = if candidate.version.is_some() {
            ErrorKind::VersionUnsupported
        } else {
            ErrorKind::ContextCreationFailed
        };
        return Err(Error::with_message(kind, "glXCreateContext returned no context"));
    }

    Ok(context)
}
