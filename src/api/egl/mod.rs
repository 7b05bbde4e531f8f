//! EGL context creation, surfaceless where the implementation allows it
//! and pbuffer-backed otherwise.

use std::ffi::{CStr, CString};
use std::fmt;
use std::ops::Deref;
use std::os::raw::{c_char, c_void};

use glutin_egl_sys::egl;
use glutin_egl_sys::egl::types::{EGLContext, EGLDisplay, EGLSurface, EGLint};
use once_cell::sync::Lazy;

use crate::api::dlloader::{SymTrait, SymWrapper};
use crate::config::{Candidate, ContextBuilder, GlProfile, Version};
use crate::error::{Error, ErrorKind, Result};

#[derive(Clone)]
pub(crate) struct Egl(SymWrapper<egl::Egl>);

/// Because `*const raw::c_void` doesn't implement `Sync`.
unsafe impl Sync for Egl {}
unsafe impl Send for Egl {}

impl SymTrait for egl::Egl {
    fn load_with<F>(_: &libloading::Library, mut loadfn: F) -> Self
    where
        F: FnMut(&'static str) -> *const c_void,
    {
        // Prior to EGL 1.5 `eglGetProcAddress` could only look up extension
        // functions, hence this two-part dance: prefer the symbol exported
        // by the library itself and only then ask the loader.
        type GetProcAddress = unsafe extern "C" fn(*const c_char) -> *const c_void;
        let get_proc_address = loadfn("eglGetProcAddress");

        Self::load_with(move |sym| {
            let addr = loadfn(sym);
            if !addr.is_null() {
                return addr;
            }

            if get_proc_address.is_null() {
                return std::ptr::null();
            }

            let get_proc_address: GetProcAddress =
                unsafe { std::mem::transmute(get_proc_address) };
            let sym = CString::new(sym.as_bytes()).unwrap();
            unsafe { get_proc_address(sym.as_ptr()) }
        })
    }
}

impl Egl {
    fn new() -> std::result::Result<Self, ()> {
        SymWrapper::new(&["libEGL.so.1", "libEGL.so"]).map(Egl)
    }
}

impl Deref for Egl {
    type Target = egl::Egl;

    fn deref(&self) -> &egl::Egl {
        &self.0
    }
}

static EGL: Lazy<Option<Egl>> = Lazy::new(|| Egl::new().ok());

pub(crate) struct Context {
    display: EGLDisplay,
    surface: EGLSurface,
    context: EGLContext,
}

unsafe impl Send for Context {}

impl Context {
    pub(crate) fn new(
        builder: &ContextBuilder<'_>,
        candidate: &Candidate,
        share: Option<&Context>,
    ) -> Result<Context> {
        let egl = EGL.as_ref().ok_or_else(|| {
            Error::with_message(ErrorKind::PlatformUnavailable, "libEGL could not be loaded")
        })?;

        unsafe {
            let display = egl.GetDisplay(egl::DEFAULT_DISPLAY as *mut _);
            if display == egl::NO_DISPLAY {
                return Err(Error::with_message(
                    ErrorKind::PlatformUnavailable,
                    "eglGetDisplay returned EGL_NO_DISPLAY",
                ));
            }

            // Initializing twice is fine; the display is a process-global
            // resource and is deliberately never terminated by a handle.
            let (mut major, mut minor) = (0, 0);
            if egl.Initialize(display, &mut major, &mut minor) == 0 {
                return Err(Error::new(
                    Some(egl.GetError() as i64),
                    Some("eglInitialize failed".into()),
                    ErrorKind::PlatformUnavailable,
                ));
            }
            let egl_version = Version::new(major as u8, minor as u8);

            let extensions = query_extensions(egl, display);

            let wants_es = candidate.profile == Some(GlProfile::Es);
            let api = if wants_es { egl::OPENGL_ES_API } else { egl::OPENGL_API };
            if egl.BindAPI(api) == 0 {
                // EGL defaults to ES; desktop GL support is optional.
                return Err(ErrorKind::NotSupported(
                    "this EGL implementation cannot bind the requested client api",
                )
                .into());
            }

            let config = choose_config(egl, display, candidate)?;

            let context = create_context(
                egl,
                display,
                egl_version,
                &extensions,
                config,
                candidate,
                share.map(|share| share.context).unwrap_or(egl::NO_CONTEXT),
            )?;

            let surface = if extensions.iter().any(|ext| ext == "EGL_KHR_surfaceless_context") {
                egl::NO_SURFACE
            } else {
                let (width, height) = builder.buffer_size();
                let attrs = [
                    egl::WIDTH as EGLint,
                    width as EGLint,
                    egl::HEIGHT as EGLint,
                    height as EGLint,
                    egl::NONE as EGLint,
                ];
                let surface = egl.CreatePbufferSurface(display, config, attrs.as_ptr());
                if surface == egl::NO_SURFACE {
                    let raw_code = egl.GetError() as i64;
                    egl.DestroyContext(display, context);
                    return Err(Error::new(
                        Some(raw_code),
                        Some("eglCreatePbufferSurface failed".into()),
                        ErrorKind::ConfigurationUnsupported,
                    ));
                }
                surface
            };

            Ok(Context { display, surface, context })
        }
    }

    pub(crate) fn make_current(&self) -> Result<()> {
        let egl = EGL.as_ref().unwrap();
        let res =
            unsafe { egl.MakeCurrent(self.display, self.surface, self.surface, self.context) };
        if res == 0 {
            let raw_code = unsafe { egl.GetError() } as i64;
            return Err(Error::new(
                Some(raw_code),
                Some("eglMakeCurrent failed".into()),
                ErrorKind::MakeCurrentFailed,
            ));
        }
        Ok(())
    }

    pub(crate) fn release_current(&self) -> Result<()> {
        let egl = EGL.as_ref().unwrap();
        let res = unsafe {
            egl.MakeCurrent(self.display, egl::NO_SURFACE, egl::NO_SURFACE, egl::NO_CONTEXT)
        };
        if res == 0 {
            return Err(ErrorKind::MakeCurrentFailed.into());
        }
        Ok(())
    }

    pub(crate) fn get_proc_address(&self, symbol: &CStr) -> *const c_void {
        let egl = EGL.as_ref().unwrap();
        unsafe { egl.GetProcAddress(symbol.as_ptr()) as *const _ }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let egl = EGL.as_ref().unwrap();
        unsafe {
            if egl.GetCurrentContext() == self.context {
                egl.MakeCurrent(self.display, egl::NO_SURFACE, egl::NO_SURFACE, egl::NO_CONTEXT);
            }
            egl.DestroyContext(self.display, self.context);
            if self.surface != egl::NO_SURFACE {
                egl.DestroySurface(self.display, self.surface);
            }
            // The display itself stays initialized: eglTerminate would tear
            // down every other context created from the default display in
            // this process.
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

unsafe fn query_extensions(egl: &Egl, display: EGLDisplay) -> Vec<String> {
    let extensions = egl.QueryString(display, egl::EXTENSIONS as EGLint);
    if extensions.is_null() {
        return Vec::new();
    }

    match CStr::from_ptr(extensions).to_str() {
        Ok(extensions) => extensions.split(' ').map(|ext| ext.to_owned()).collect(),
        Err(_) => Vec::new(),
    }
}

unsafe fn choose_config(
    egl: &Egl,
    display: EGLDisplay,
    candidate: &Candidate,
) -> Result<egl::types::EGLConfig> {
    let renderable = match (candidate.profile, candidate.version) {
        (Some(GlProfile::Es), Some(version)) if version.major >= 3 => egl::OPENGL_ES3_BIT,
        (Some(GlProfile::Es), _) => egl::OPENGL_ES2_BIT,
        _ => egl::OPENGL_BIT,
    };

    let descriptor = [
        egl::SURFACE_TYPE as EGLint,
        egl::PBUFFER_BIT as EGLint,
        egl::RENDERABLE_TYPE as EGLint,
        renderable as EGLint,
        egl::RED_SIZE as EGLint,
        8,
        egl::GREEN_SIZE as EGLint,
        8,
        egl::BLUE_SIZE as EGLint,
        8,
        egl::ALPHA_SIZE as EGLint,
        8,
        egl::DEPTH_SIZE as EGLint,
        24,
        egl::STENCIL_SIZE as EGLint,
        8,
        egl::NONE as EGLint,
    ];

    let mut config = std::ptr::null();
    let mut num_configs = 0;
    if egl.ChooseConfig(display, descriptor.as_ptr(), &mut config, 1, &mut num_configs) == 0
        || num_configs == 0
    {
        return Err(Error::with_message(
            ErrorKind::ConfigurationUnsupported,
            "no EGLConfig matched the pbuffer request",
        ));
    }

    Ok(config)
}

unsafe fn create_context(
    egl: &Egl,
    display: EGLDisplay,
    egl_version: Version,
    extensions: &[String],
    config: egl::types::EGLConfig,
    candidate: &Candidate,
    share: EGLContext,
) -> Result<EGLContext> {
    let has_create_context = egl_version >= Version::new(1, 5)
        || extensions.iter().any(|ext| ext == "EGL_KHR_create_context");

    let mut attrs = Vec::<EGLint>::with_capacity(8);

    match candidate.version {
        Some(version) if has_create_context => {
            attrs.push(egl::CONTEXT_MAJOR_VERSION as EGLint);
            attrs.push(version.major as EGLint);
            attrs.push(egl::CONTEXT_MINOR_VERSION as EGLint);
            attrs.push(version.minor as EGLint);

            match candidate.profile {
                Some(GlProfile::Core) => {
                    attrs.push(egl::CONTEXT_OPENGL_PROFILE_MASK as EGLint);
                    attrs.push(egl::CONTEXT_OPENGL_CORE_PROFILE_BIT as EGLint);
                },
                Some(GlProfile::Compatibility) => {
                    attrs.push(egl::CONTEXT_OPENGL_PROFILE_MASK as EGLint);
                    attrs.push(egl::CONTEXT_OPENGL_COMPATIBILITY_PROFILE_BIT as EGLint);
                },
                // The client version attributes already select ES.
                Some(GlProfile::Es) | None => {},
            }
        },
        Some(version) if candidate.profile == Some(GlProfile::Es) => {
            // EGL 1.3 way of requesting an ES context.
            attrs.push(egl::CONTEXT_CLIENT_VERSION as EGLint);
            attrs.push(version.major as EGLint);
        },
        Some(_) => {
            return Err(Error::with_message(
                ErrorKind::VersionUnsupported,
                "EGL_KHR_create_context is required for versioned desktop contexts",
            ));
        },
        // Legacy candidate: whatever the bound api hands out.
        None => {},
    }

    attrs.push(egl::NONE as EGLint);

    let context = egl.CreateContext(display, config, share, attrs.as_ptr());
    if context == egl::NO_CONTEXT {
        let raw_code = egl.GetError() as u32;
        let kind = match raw_code {
            egl::BAD_MATCH | egl::BAD_ATTRIBUTE => ErrorKind::VersionUnsupported,
            egl::BAD_CONFIG => ErrorKind::ConfigurationUnsupported,
            _ => ErrorKind::ContextCreationFailed,
        };
        return Err(Error::new(
            Some(raw_code as i64),
            Some("eglCreateContext failed".into()),
            kind,
        ));
    }

    Ok(context)
}
