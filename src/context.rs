//! The headless context handle and the creation fallback loop.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::fmt;
use std::num::NonZeroU64;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};

use crate::api;
use crate::config::{
    backend_order, candidates, Backend, Candidate, ContextBuilder, GlProfile, Version,
};
use crate::error::{Attempt, Error, ErrorKind, Result};

/// Ids are never reused, so a stale thread-local binding can't alias a
/// later context.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// The context considered current on this thread, if any.
    ///
    /// The native apis keep this state per thread themselves; it is
    /// mirrored here so binding queries don't need native round trips and
    /// so `release_current` can stay a no-op for non-current handles.
    static CURRENT_CONTEXT: Cell<Option<NonZeroU64>> = const { Cell::new(None) };
}

fn next_context_id() -> NonZeroU64 {
    NonZeroU64::new(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
        .expect("context id counter overflowed")
}

pub(crate) fn bind_current(id: NonZeroU64) {
    CURRENT_CONTEXT.with(|current| current.set(Some(id)));
}

pub(crate) fn unbind_current() {
    CURRENT_CONTEXT.with(|current| current.set(None));
}

pub(crate) fn current_id() -> Option<NonZeroU64> {
    CURRENT_CONTEXT.with(|current| current.get())
}

/// Per-backend dispatch over the live variant.
macro_rules! platform_dispatch {
    ($inner:expr, $ctx:ident => $body:expr) => {
        match $inner {
            #[cfg(wgl_backend)]
            PlatformContext::Wgl($ctx) => $body,
            #[cfg(glx_backend)]
            PlatformContext::Glx($ctx) => $body,
            #[cfg(egl_backend)]
            PlatformContext::Egl($ctx) => $body,
            #[cfg(cgl_backend)]
            PlatformContext::Cgl($ctx) => $body,
            #[cfg(osmesa_backend)]
            PlatformContext::OsMesa($ctx) => $body,
        }
    };
}

/// Exactly one native wrapper is live per handle.
#[derive(Debug)]
pub(crate) enum PlatformContext {
    #[cfg(wgl_backend)]
    Wgl(api::wgl::Context),
    #[cfg(glx_backend)]
    Glx(api::glx::Context),
    #[cfg(egl_backend)]
    Egl(api::egl::Context),
    #[cfg(cgl_backend)]
    Cgl(api::cgl::Context),
    #[cfg(osmesa_backend)]
    OsMesa(api::osmesa::Context),
}

/// A headless OpenGL context.
///
/// The handle exclusively owns its native resources. It can move between
/// threads, but is only ever current on at most one thread at a time;
/// callers sharing one handle across threads must serialize
/// `make_current`/GL/`release_current` sequences externally.
pub struct Context {
    inner: Option<PlatformContext>,
    id: NonZeroU64,
    backend: Backend,
    version: Version,
    profile: GlProfile,
    proc_cache: RefCell<HashMap<String, *const c_void>>,
}

// The native handles are only touched from the thread the value lives on;
// the cached pointers are plain data.
unsafe impl Send for Context {}

impl ContextBuilder<'_> {
    /// Create the context.
    ///
    /// Tries every backend in the platform order (or the forced one) and,
    /// within a backend, every version/profile candidate. On failure the
    /// returned error aggregates each rejected candidate so missing
    /// drivers, missing libraries and unsupported versions stay
    /// distinguishable.
    pub fn build(self) -> Result<Context> {
        // The native size attributes are all c_int sized; a dimension
        // that doesn't fit would truncate at the api boundary and leave
        // the backing buffer smaller than what the driver writes to.
        let (width, height) = self.buffer_size();
        if width > c_int::MAX as u32 || height > c_int::MAX as u32 {
            return Err(Error::with_message(
                ErrorKind::BadMatch,
                "buffer dimensions must fit a native int",
            ));
        }

        let mut order = backend_order(&self);

        if let Some(share) = self.sharing {
            if share.inner.is_none() {
                return Err(ErrorKind::BadContext.into());
            }

            match self.backend {
                Some(requested) if requested != share.backend => {
                    return Err(Error::with_message(
                        ErrorKind::BadMatch,
                        "shared context is backed by a different backend",
                    ));
                },
                _ => order = vec![share.backend],
            }
        }

        let candidate_list = candidates(self.version, self.profile);
        let mut attempts = Vec::new();

        for backend in order {
            for candidate in &candidate_list {
                let label = candidate.label(backend);
                debug!("trying candidate {label}");

                match create_platform(backend, &self, candidate) {
                    Ok(inner) => {
                        let (version, profile) = candidate.obtained();
                        debug!("created {label}");
                        return Ok(Context {
                            inner: Some(inner),
                            id: next_context_id(),
                            backend,
                            version,
                            profile,
                            proc_cache: RefCell::new(HashMap::new()),
                        });
                    },
                    Err(err) => {
                        let kind = err.error_kind();
                        warn!("candidate {label} failed: {err}");

                        match kind {
                            // The whole backend is missing; record it once
                            // and move on.
                            ErrorKind::PlatformUnavailable => {
                                attempts.push(Attempt {
                                    candidate: backend.name().into(),
                                    kind,
                                    message: Some(err.to_string()),
                                });
                                break;
                            },
                            // Recoverable inside the fallback loop.
                            ErrorKind::VersionUnsupported
                            | ErrorKind::ConfigurationUnsupported => {
                                attempts.push(Attempt {
                                    candidate: label,
                                    kind,
                                    message: Some(err.to_string()),
                                });
                            },
                            // The backend can't serve any candidate of this
                            // request shape (e.g. ES where only desktop GL
                            // exists); try the next backend.
                            ErrorKind::NotSupported(_) => {
                                attempts.push(Attempt {
                                    candidate: label,
                                    kind,
                                    message: Some(err.to_string()),
                                });
                                break;
                            },
                            // Native failures are not assumed transient.
                            _ => return Err(err),
                        }
                    },
                }
            }
        }

        Err(Error::aggregate(attempts))
    }
}

fn create_platform(
    backend: Backend,
    builder: &ContextBuilder<'_>,
    candidate: &Candidate,
) -> Result<PlatformContext> {
    // Pull out the matching native share handle, if sharing was requested.
    macro_rules! share_as {
        ($variant:ident) => {
            match builder.sharing.map(|ctx| ctx.inner.as_ref()) {
                None => None,
                Some(Some(PlatformContext::$variant(inner))) => Some(inner),
                #[allow(unreachable_patterns)]
                Some(Some(_)) => {
                    return Err(Error::with_message(
                        ErrorKind::BadMatch,
                        "shared context is backed by a different backend",
                    ))
                },
                Some(None) => return Err(ErrorKind::BadContext.into()),
            }
        };
    }

    match backend {
        #[cfg(wgl_backend)]
        Backend::Wgl => {
            api::wgl::Context::new(builder, candidate, share_as!(Wgl)).map(PlatformContext::Wgl)
        },
        #[cfg(glx_backend)]
        Backend::Glx => {
            api::glx::Context::new(builder, candidate, share_as!(Glx)).map(PlatformContext::Glx)
        },
        #[cfg(egl_backend)]
        Backend::Egl => {
            api::egl::Context::new(builder, candidate, share_as!(Egl)).map(PlatformContext::Egl)
        },
        #[cfg(cgl_backend)]
        Backend::Cgl => {
            api::cgl::Context::new(builder, candidate, share_as!(Cgl)).map(PlatformContext::Cgl)
        },
        #[cfg(osmesa_backend)]
        Backend::OsMesa => api::osmesa::Context::new(builder, candidate, share_as!(OsMesa))
            .map(PlatformContext::OsMesa),
        #[allow(unreachable_patterns)]
        _ => Err(Error::with_message(
            ErrorKind::PlatformUnavailable,
            format!("crate was built without the {} backend", backend.name()),
        )),
    }
}

impl Context {
    /// Bind the context to the calling thread.
    ///
    /// Any context previously current on this thread is implicitly
    /// unbound.
    pub fn make_current(&self) -> Result<()> {
        let inner = self.inner.as_ref().ok_or(ErrorKind::BadContext)?;
        platform_dispatch!(inner, ctx => ctx.make_current())?;
        bind_current(self.id);
        Ok(())
    }

    /// Unbind the context from the calling thread.
    ///
    /// A no-op when the context isn't current here, so it's always safe to
    /// call, including after `destroy`.
    pub fn release_current(&self) -> Result<()> {
        if current_id() != Some(self.id) {
            return Ok(());
        }

        if let Some(inner) = self.inner.as_ref() {
            platform_dispatch!(inner, ctx => ctx.release_current())?;
        }
        unbind_current();
        Ok(())
    }

    /// Whether the context is current on the calling thread.
    pub fn is_current(&self) -> bool {
        self.inner.is_some() && current_id() == Some(self.id)
    }

    /// Resolve a GL symbol through the backend's loader.
    ///
    /// Returns a null pointer for unknown symbols, mirroring the native
    /// loaders: null means "unsupported", not "try again". The context
    /// should be current on the calling thread; some native loaders (WGL,
    /// GLX) resolve relative to the current context, and the returned
    /// pointers are only guaranteed valid while the context is current.
    ///
    /// Resolved addresses are cached per handle; the cache dies with the
    /// context.
    pub fn load(&self, symbol: &str) -> Result<*const c_void> {
        let inner = self.inner.as_ref().ok_or(ErrorKind::BadContext)?;

        if let Some(ptr) = self.proc_cache.borrow().get(symbol) {
            return Ok(*ptr);
        }

        let ptr = match CString::new(symbol) {
            Ok(name) => platform_dispatch!(inner, ctx => ctx.get_proc_address(&name)),
            // Interior nul can't name any native symbol.
            Err(_) => std::ptr::null(),
        };

        self.proc_cache.borrow_mut().insert(symbol.to_owned(), ptr);
        Ok(ptr)
    }

    /// Destroy the context, releasing every native resource it owns.
    ///
    /// Idempotent: destroying an already-destroyed handle is a no-op.
    /// Dropping the handle destroys it as well.
    pub fn destroy(&mut self) {
        if current_id() == Some(self.id) {
            if let Some(inner) = self.inner.as_ref() {
                if let Err(err) = platform_dispatch!(inner, ctx => ctx.release_current()) {
                    warn!("failed to release context during destroy: {err}");
                }
            }
            unbind_current();
        }

        // Native teardown happens in the wrapper's Drop, in reverse
        // acquisition order.
        self.inner = None;
        self.proc_cache.borrow_mut().clear();
    }

    /// The GL version the factory obtained.
    ///
    /// Equal to the request when one was made explicitly; otherwise the
    /// candidate the fallback loop settled on.
    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// The profile the factory obtained.
    #[inline]
    pub fn profile(&self) -> GlProfile {
        self.profile
    }

    /// The backend this context is backed by.
    #[inline]
    pub fn backend(&self) -> Backend {
        self.backend
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("backend", &self.backend)
            .field("version", &self.version)
            .field("profile", &self.profile)
            .field("destroyed", &self.inner.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebinding_replaces_the_previous_binding() {
        let a = NonZeroU64::new(101).unwrap();
        let b = NonZeroU64::new(102).unwrap();

        bind_current(a);
        assert_eq!(current_id(), Some(a));

        bind_current(b);
        assert_eq!(current_id(), Some(b));

        unbind_current();
        assert_eq!(current_id(), None);
    }

    #[test]
    fn bindings_are_thread_local() {
        let a = NonZeroU64::new(201).unwrap();
        bind_current(a);

        std::thread::spawn(|| {
            assert_eq!(current_id(), None);
        })
        .join()
        .unwrap();

        assert_eq!(current_id(), Some(a));
        unbind_current();
    }

    #[test]
    fn context_ids_are_unique() {
        let first = next_context_id();
        let second = next_context_id();
        assert_ne!(first, second);
    }

    /// A handle whose native context is already gone; everything past the
    /// `inner` slot is plain bookkeeping, so no driver is involved.
    fn destroyed_context() -> Context {
        Context {
            inner: None,
            id: next_context_id(),
            backend: Backend::OsMesa,
            version: Version::new(3, 3),
            profile: GlProfile::Core,
            proc_cache: RefCell::new(HashMap::new()),
        }
    }

    #[test]
    fn destroyed_handles_report_bad_context() {
        let mut ctx = destroyed_context();

        assert!(!ctx.is_current());
        assert_eq!(ctx.make_current().unwrap_err().error_kind(), ErrorKind::BadContext);
        assert_eq!(ctx.load("glGetString").unwrap_err().error_kind(), ErrorKind::BadContext);

        // Releasing a dead handle stays a no-op.
        assert!(ctx.release_current().is_ok());

        // Destroying again changes nothing.
        ctx.destroy();
        ctx.destroy();
        assert!(!ctx.is_current());
    }

    #[test]
    fn destroy_clears_the_proc_cache() {
        let mut ctx = destroyed_context();
        ctx.proc_cache.borrow_mut().insert("glGetString".into(), std::ptr::null());

        ctx.destroy();
        assert!(ctx.proc_cache.borrow().is_empty());
    }
}
