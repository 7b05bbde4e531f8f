//! WGL context creation behind a hidden window.
//!
//! The platform's bootstrap rules require a legacy context first: only a
//! current context can resolve `wglCreateContextAttribsARB`, which then
//! creates the real versioned/profiled context. The hidden window and its
//! device context live for as long as the handle does.

use std::ffi::{CStr, CString, OsStr};
use std::fmt;
use std::io::Error as IoError;
use std::os::raw::{c_int, c_void};
use std::os::windows::ffi::OsStrExt;

use glutin_wgl_sys::wgl::types::HGLRC;
use glutin_wgl_sys::{wgl, wgl_extra};
use windows_sys::Win32::Foundation::{HMODULE, HWND};
use windows_sys::Win32::Graphics::Gdi::{GetDC, ReleaseDC, HDC};
use windows_sys::Win32::Graphics::OpenGL::{
    ChoosePixelFormat, DescribePixelFormat, SetPixelFormat, PFD_DRAW_TO_WINDOW, PFD_MAIN_PLANE,
    PFD_SUPPORT_OPENGL, PFD_TYPE_RGBA, PIXELFORMATDESCRIPTOR,
};
use windows_sys::Win32::System::LibraryLoader::{
    GetModuleHandleW, GetProcAddress, LoadLibraryW,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, RegisterClassExW, CS_OWNDC, CW_USEDEFAULT,
    WNDCLASSEXW, WS_CLIPCHILDREN, WS_CLIPSIBLINGS, WS_POPUP,
};

use crate::config::{Candidate, ContextBuilder, GlProfile};
use crate::error::{Error, ErrorKind, Result};

const WINDOW_CLASS: &str = "glcontext hidden window";

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(Some(0)).collect()
}

/// An invisible window plus its device context; released on drop.
struct HiddenWindow {
    hwnd: HWND,
    hdc: HDC,
}

impl HiddenWindow {
    fn new() -> Result<Self> {
        unsafe {
            let class_name = wide(WINDOW_CLASS);

            let mut class: WNDCLASSEXW = std::mem::zeroed();
            class.cbSize = std::mem::size_of::<WNDCLASSEXW>() as u32;
            class.style = CS_OWNDC;
            class.lpfnWndProc = Some(DefWindowProcW);
            class.hInstance = GetModuleHandleW(std::ptr::null());
            class.lpszClassName = class_name.as_ptr();

            // Re-registering an existing class fails; that's fine, the
            // first registration is the one in use.
            RegisterClassExW(&class);

            let title = wide("glcontext");
            let hwnd = CreateWindowExW(
                0,
                class_name.as_ptr(),
                title.as_ptr(),
                WS_POPUP | WS_CLIPSIBLINGS | WS_CLIPCHILDREN,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                1,
                1,
                0,
                0,
                GetModuleHandleW(std::ptr::null()),
                std::ptr::null(),
            );
            if hwnd == 0 {
                return Err(Error::with_message(
                    ErrorKind::ContextCreationFailed,
                    format!("CreateWindowExW failed: {}", IoError::last_os_error()),
                ));
            }

            let hdc = GetDC(hwnd);
            if hdc == 0 {
                DestroyWindow(hwnd);
                return Err(Error::with_message(
                    ErrorKind::ContextCreationFailed,
                    format!("GetDC failed: {}", IoError::last_os_error()),
                ));
            }

            Ok(HiddenWindow { hwnd, hdc })
        }
    }
}

impl Drop for HiddenWindow {
    fn drop(&mut self) {
        unsafe {
            ReleaseDC(self.hwnd, self.hdc);
            DestroyWindow(self.hwnd);
        }
    }
}

/// Deletes the wrapped context on drop.
struct ContextWrapper(HGLRC);

impl Drop for ContextWrapper {
    fn drop(&mut self) {
        unsafe {
            wgl::DeleteContext(self.0);
        }
    }
}

/// Restores whatever was current before the bootstrap context took over,
/// so creating a context never disturbs the caller's binding.
struct CurrentContextGuard {
    previous_hdc: wgl::types::HDC,
    previous_context: HGLRC,
}

impl CurrentContextGuard {
    unsafe fn make_current(hdc: HDC, context: HGLRC) -> Result<Self> {
        let previous_hdc = wgl::GetCurrentDC();
        let previous_context = wgl::GetCurrentContext();

        if wgl::MakeCurrent(hdc as *const _, context) == 0 {
            return Err(Error::with_message(
                ErrorKind::MakeCurrentFailed,
                format!("wglMakeCurrent failed: {}", IoError::last_os_error()),
            ));
        }

        Ok(CurrentContextGuard { previous_hdc, previous_context })
    }
}

impl Drop for CurrentContextGuard {
    fn drop(&mut self) {
        unsafe {
            // Null/null when nothing was current, which is a plain unbind.
            wgl::MakeCurrent(self.previous_hdc, self.previous_context);
        }
    }
}

pub(crate) struct Context {
    window: HiddenWindow,
    context: HGLRC,

    /// Bound to `opengl32.dll`. `wglGetProcAddress` returns null for GL
    /// 1.1 entry points because the system itself exports them.
    lib_opengl32: HMODULE,
}

unsafe impl Send for Context {}

impl Context {
    pub(crate) fn new(
        _builder: &ContextBuilder<'_>,
        candidate: &Candidate,
        share: Option<&Context>,
    ) -> Result<Context> {
        let window = HiddenWindow::new()?;
        let share_context = share.map(|share| share.context).unwrap_or(std::ptr::null());

        unsafe {
            set_pixel_format(window.hdc)?;

            let lib_opengl32 = load_opengl32_dll()?;

            // Bootstrap context; the platform hands out extended creation
            // entry points only to a current context.
            let legacy = wgl::CreateContext(window.hdc as *const _);
            if legacy.is_null() {
                return Err(Error::with_message(
                    ErrorKind::ContextCreationFailed,
                    format!("wglCreateContext failed: {}", IoError::last_os_error()),
                ));
            }
            let legacy = ContextWrapper(legacy);

            let context = match candidate.version {
                Some(_) => {
                    let guard = CurrentContextGuard::make_current(window.hdc, legacy.0)?;
                    let extra = load_extra_functions();
                    let extensions = load_extensions(window.hdc, &extra);
                    let context = create_context_arb(
                        window.hdc,
                        &extra,
                        &extensions,
                        candidate,
                        share_context,
                    )?;
                    drop(guard);
                    context
                },
                // Legacy last-resort candidate: keep the bootstrap context.
                None => {
                    if !share_context.is_null()
                        && wgl::ShareLists(share_context, legacy.0) == 0
                    {
                        return Err(Error::with_message(
                            ErrorKind::ContextCreationFailed,
                            format!("wglShareLists failed: {}", IoError::last_os_error()),
                        ));
                    }
                    let context = legacy.0;
                    std::mem::forget(legacy);
                    context
                },
            };

            Ok(Context { window, context, lib_opengl32 })
        }
    }

    pub(crate) fn make_current(&self) -> Result<()> {
        let res = unsafe { wgl::MakeCurrent(self.window.hdc as *const _, self.context) };
        if res == 0 {
            return Err(Error::with_message(
                ErrorKind::MakeCurrentFailed,
                format!("wglMakeCurrent failed: {}", IoError::last_os_error()),
            ));
        }
        Ok(())
    }

    pub(crate) fn release_current(&self) -> Result<()> {
        let res = unsafe { wgl::MakeCurrent(std::ptr::null(), std::ptr::null()) };
        if res == 0 {
            return Err(ErrorKind::MakeCurrentFailed.into());
        }
        Ok(())
    }

    pub(crate) fn get_proc_address(&self, symbol: &CStr) -> *const c_void {
        unsafe {
            let addr = wgl::GetProcAddress(symbol.as_ptr()) as *const c_void;
            if !addr.is_null() {
                return addr;
            }
            match GetProcAddress(self.lib_opengl32, symbol.as_ptr() as *const u8) {
                Some(addr) => addr as *const c_void,
                None => std::ptr::null(),
            }
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            if wgl::GetCurrentContext() == self.context {
                wgl::MakeCurrent(std::ptr::null(), std::ptr::null());
            }
            wgl::DeleteContext(self.context);
            // The window and its DC go down with `self.window`.
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("context", &self.context).finish()
    }
}

/// A plain RGBA/depth/stencil format is all a headless context needs.
unsafe fn set_pixel_format(hdc: HDC) -> Result<()> {
    let mut descriptor: PIXELFORMATDESCRIPTOR = std::mem::zeroed();
    descriptor.nSize = std::mem::size_of::<PIXELFORMATDESCRIPTOR>() as u16;
    descriptor.nVersion = 1;
    descriptor.dwFlags = PFD_DRAW_TO_WINDOW | PFD_SUPPORT_OPENGL;
    descriptor.iPixelType = PFD_TYPE_RGBA;
    descriptor.cColorBits = 24;
    descriptor.cAlphaBits = 8;
    descriptor.cDepthBits = 24;
    descriptor.cStencilBits = 8;
    descriptor.iLayerType = PFD_MAIN_PLANE;

    let format_id = ChoosePixelFormat(hdc, &descriptor);
    if format_id == 0 {
        return Err(Error::with_message(
            ErrorKind::ConfigurationUnsupported,
            "no available pixel format",
        ));
    }

    let mut format: PIXELFORMATDESCRIPTOR = std::mem::zeroed();
    if DescribePixelFormat(
        hdc,
        format_id,
        std::mem::size_of::<PIXELFORMATDESCRIPTOR>() as u32,
        &mut format,
    ) == 0
    {
        return Err(Error::with_message(
            ErrorKind::ConfigurationUnsupported,
            format!("DescribePixelFormat failed: {}", IoError::last_os_error()),
        ));
    }

    if SetPixelFormat(hdc, format_id, &format) == 0 {
        return Err(Error::with_message(
            ErrorKind::ConfigurationUnsupported,
            format!("SetPixelFormat failed: {}", IoError::last_os_error()),
        ));
    }

    Ok(())
}

unsafe fn load_opengl32_dll() -> Result<HMODULE> {
    let name = wide("opengl32.dll");
    let lib = LoadLibraryW(name.as_ptr());
    if lib == 0 {
        return Err(Error::with_message(
            ErrorKind::PlatformUnavailable,
            format!("LoadLibrary(opengl32.dll) failed: {}", IoError::last_os_error()),
        ));
    }
    Ok(lib)
}

/// Loads the WGL functions that are not guaranteed to be supported.
///
/// Must be called with a current context.
unsafe fn load_extra_functions() -> wgl_extra::Wgl {
    wgl_extra::Wgl::load_with(|addr| {
        let addr = CString::new(addr.as_bytes()).unwrap();
        wgl::GetProcAddress(addr.as_ptr()) as *const c_void
    })
}

unsafe fn load_extensions(hdc: HDC, extra: &wgl_extra::Wgl) -> String {
    if extra.GetExtensionsStringARB.is_loaded() {
        let data = extra.GetExtensionsStringARB(hdc as *const _);
        CStr::from_ptr(data).to_string_lossy().into_owned()
    } else if extra.GetExtensionsStringEXT.is_loaded() {
        let data = extra.GetExtensionsStringEXT();
        CStr::from_ptr(data).to_string_lossy().into_owned()
    } else {
        String::new()
    }
}

unsafe fn create_context_arb(
    hdc: HDC,
    extra: &wgl_extra::Wgl,
    extensions: &str,
    candidate: &Candidate,
    share: HGLRC,
) -> Result<HGLRC> {
    if !extensions.split(' ').any(|ext| ext == "WGL_ARB_create_context") {
        return Err(Error::with_message(
            ErrorKind::VersionUnsupported,
            "WGL_ARB_create_context is not advertised",
        ));
    }

    let version = candidate.version.unwrap();
    let mut attrs = Vec::<c_int>::with_capacity(8);

    attrs.push(wgl_extra::CONTEXT_MAJOR_VERSION_ARB as c_int);
    attrs.push(version.major as c_int);
    attrs.push(wgl_extra::CONTEXT_MINOR_VERSION_ARB as c_int);
    attrs.push(version.minor as c_int);

    match candidate.profile {
        Some(GlProfile::Core) => {
            attrs.push(wgl_extra::CONTEXT_PROFILE_MASK_ARB as c_int);
            attrs.push(wgl_extra::CONTEXT_CORE_PROFILE_BIT_ARB as c_int);
        },
        Some(GlProfile::Compatibility) => {
            attrs.push(wgl_extra::CONTEXT_PROFILE_MASK_ARB as c_int);
            attrs.push(wgl_extra::CONTEXT_COMPATIBILITY_PROFILE_BIT_ARB as c_int);
        },
        Some(GlProfile::Es) => {
            if !extensions.split(' ').any(|ext| ext == "WGL_EXT_create_context_es2_profile") {
                return Err(ErrorKind::NotSupported(
                    "WGL_EXT_create_context_es2_profile is not advertised",
                )
                .into());
            }
            attrs.push(wgl_extra::CONTEXT_PROFILE_MASK_ARB as c_int);
            attrs.push(wgl_extra::CONTEXT_ES2_PROFILE_BIT_EXT as c_int);
        },
        None => {},
    }

    attrs.push(0);

    let context = extra.CreateContextAttribsARB(hdc as *const _, share, attrs.as_ptr());
    if context.is_null() {
        return Err(Error::new(
            Some(IoError::last_os_error().raw_os_error().unwrap_or(0) as i64),
            Some("wglCreateContextAttribsARB rejected the version/profile".into()),
            ErrorKind::VersionUnsupported,
        ));
    }

    Ok(context)
}
