//! CGL context creation. No drawable is ever attached, which is exactly
//! what CGL allows: a context with no surface is legal and renders into
//! framebuffer objects only.

#![allow(non_upper_case_globals)]

use std::ffi::CStr;
use std::fmt;
use std::os::raw::c_void;
use std::ptr;

use cgl::{
    kCGLNoError, CGLChoosePixelFormat, CGLContextObj, CGLCreateContext, CGLDestroyContext,
    CGLDestroyPixelFormat, CGLError, CGLErrorString, CGLGetCurrentContext, CGLPixelFormatObj,
    CGLSetCurrentContext,
};
use libloading::Library;
use once_cell::sync::Lazy;

use crate::config::{Candidate, ContextBuilder, GlProfile, Version};
use crate::error::{Error, ErrorKind, Result};

type CGLPixelFormatAttribute = std::os::raw::c_int;

const kCGLPFAColorSize: CGLPixelFormatAttribute = 8;
const kCGLPFAAlphaSize: CGLPixelFormatAttribute = 11;
const kCGLPFADepthSize: CGLPixelFormatAttribute = 12;
const kCGLPFAStencilSize: CGLPixelFormatAttribute = 13;
const kCGLPFAAccelerated: CGLPixelFormatAttribute = 73;
const kCGLPFAAllowOfflineRenderers: CGLPixelFormatAttribute = 96;
const kCGLPFAOpenGLProfile: CGLPixelFormatAttribute = 99;

// Values for kCGLPFAOpenGLProfile.
const kCGLOGLPVersion_Legacy: CGLPixelFormatAttribute = 0x1000;
const kCGLOGLPVersion_3_2_Core: CGLPixelFormatAttribute = 0x3200;
const kCGLOGLPVersion_GL4_Core: CGLPixelFormatAttribute = 0x4100;

/// GL symbols live in the OpenGL framework itself; CGL has no
/// `GetProcAddress` of its own.
static OPENGL_FRAMEWORK: Lazy<Option<Library>> = Lazy::new(|| {
    // The loaded symbols stay valid for the lifetime of the process.
    unsafe { Library::new("/System/Library/Frameworks/OpenGL.framework/OpenGL").ok() }
});

fn check_error(error: CGLError, kind: ErrorKind) -> Result<()> {
    if error == kCGLNoError {
        return Ok(());
    }

    let description =
        unsafe { CStr::from_ptr(CGLErrorString(error)).to_str().unwrap_or_default().to_string() };
    Err(Error::new(Some(error as i64), Some(description), kind))
}

/// Maps a requested version/profile pair onto the fixed set of profiles
/// the system offers: legacy (up to 2.1), 3.2 core and 4.1 core.
fn profile_attribute(candidate: &Candidate) -> Result<CGLPixelFormatAttribute> {
    const MAX_CORE: Version = Version { major: 4, minor: 1 };

    match (candidate.profile, candidate.version) {
        (Some(GlProfile::Es), _) => {
            Err(ErrorKind::NotSupported("CGL does not provide OpenGL ES").into())
        },
        (Some(GlProfile::Core), Some(version)) if version > MAX_CORE => Err(Error::with_message(
            ErrorKind::VersionUnsupported,
            "4.1 is the newest OpenGL this system ships",
        )),
        (Some(GlProfile::Core), Some(version)) if version.major >= 4 => {
            Ok(kCGLOGLPVersion_GL4_Core)
        },
        (Some(GlProfile::Core), Some(version)) if version >= Version::new(3, 2) => {
            Ok(kCGLOGLPVersion_3_2_Core)
        },
        (Some(GlProfile::Core), Some(_)) => Err(Error::with_message(
            ErrorKind::VersionUnsupported,
            "the core profile starts at 3.2",
        )),
        (Some(GlProfile::Compatibility), Some(version)) if version > Version::new(2, 1) => {
            Err(Error::with_message(
                ErrorKind::VersionUnsupported,
                "the compatibility profile ends at 2.1 on this system",
            ))
        },
        // No explicit profile: pick the newest profile able to satisfy
        // the version.
        (None, Some(version)) if version > MAX_CORE => Err(Error::with_message(
            ErrorKind::VersionUnsupported,
            "4.1 is the newest OpenGL this system ships",
        )),
        (None, Some(version)) if version.major >= 4 => Ok(kCGLOGLPVersion_GL4_Core),
        (None, Some(version)) if version >= Version::new(3, 2) => Ok(kCGLOGLPVersion_3_2_Core),
        _ => Ok(kCGLOGLPVersion_Legacy),
    }
}

pub(crate) struct Context {
    context: CGLContextObj,
}

unsafe impl Send for Context {}

impl Context {
    pub(crate) fn new(
        builder: &ContextBuilder<'_>,
        candidate: &Candidate,
        share: Option<&Context>,
    ) -> Result<Context> {
        let profile = profile_attribute(candidate)?;

        let mut attrs = Vec::<CGLPixelFormatAttribute>::with_capacity(16);
        attrs.push(kCGLPFAOpenGLProfile);
        attrs.push(profile);
        attrs.push(kCGLPFAColorSize);
        attrs.push(24);
        attrs.push(kCGLPFAAlphaSize);
        attrs.push(8);
        attrs.push(kCGLPFADepthSize);
        attrs.push(24);
        attrs.push(kCGLPFAStencilSize);
        attrs.push(8);
        if builder.force_software {
            // Without the accelerated requirement the software renderer
            // stays eligible; headless boxes may have no GPU at all.
            attrs.push(kCGLPFAAllowOfflineRenderers);
        } else {
            attrs.push(kCGLPFAAccelerated);
        }
        attrs.push(0);

        unsafe {
            let mut pixel_format: CGLPixelFormatObj = ptr::null_mut();
            let mut num_formats = 0;
            let err = CGLChoosePixelFormat(attrs.as_ptr(), &mut pixel_format, &mut num_formats);
            if err != kCGLNoError || pixel_format.is_null() {
                // An unsatisfiable profile request is the usual cause.
                let kind = if profile == kCGLOGLPVersion_Legacy {
                    ErrorKind::ConfigurationUnsupported
                } else {
                    ErrorKind::VersionUnsupported
                };
                check_error(err, kind)?;
                return Err(Error::with_message(kind, "no matching pixel format"));
            }

            let share_context = share.map(|share| share.context).unwrap_or(ptr::null_mut());

            let mut context: CGLContextObj = ptr::null_mut();
            let err = CGLCreateContext(pixel_format, share_context, &mut context);
            // The pixel format is only an input to context creation.
            CGLDestroyPixelFormat(pixel_format);
            check_error(err, ErrorKind::ContextCreationFailed)?;
            if context.is_null() {
                return Err(Error::with_message(
                    ErrorKind::ContextCreationFailed,
                    "CGLCreateContext produced no context",
                ));
            }

            Ok(Context { context })
        }
    }

    pub(crate) fn make_current(&self) -> Result<()> {
        let err = unsafe { CGLSetCurrentContext(self.context) };
        check_error(err, ErrorKind::MakeCurrentFailed)
    }

    pub(crate) fn release_current(&self) -> Result<()> {
        let err = unsafe { CGLSetCurrentContext(ptr::null_mut()) };
        check_error(err, ErrorKind::MakeCurrentFailed)
    }

    pub(crate) fn get_proc_address(&self, symbol: &CStr) -> *const c_void {
        let framework = match OPENGL_FRAMEWORK.as_ref() {
            Some(framework) => framework,
            None => return ptr::null(),
        };

        unsafe {
            framework
                .get::<*const c_void>(symbol.to_bytes_with_nul())
                .map(|sym| *sym)
                .unwrap_or(ptr::null())
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            if CGLGetCurrentContext() == self.context {
                CGLSetCurrentContext(ptr::null_mut());
            }
            CGLDestroyContext(self.context);
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("context", &self.context).finish()
    }
}
