//! Portable headless OpenGL context creation.
//!
//! The purpose of this library is to stand up a valid, current OpenGL
//! context without owning a window or an event loop, on as many platforms
//! as possible: WGL on Windows, GLX or EGL on Linux/BSD, CGL on macOS,
//! plus the OSMesa software rasterizer when it's installed.
//!
//! Configure a context with a [`ContextBuilder`] and create it with
//! [`ContextBuilder::build`]. The resulting [`Context`] exposes the whole
//! uniform contract: [`make_current`], [`release_current`], [`load`] for
//! GL symbol resolution and [`destroy`], along with queries for the
//! obtained GL [`version`]/[`profile`] and the active [`backend`].
//!
//! ```no_run
//! use glcontext::{ContextBuilder, GlProfile, Version};
//!
//! let ctx = ContextBuilder::new()
//!     .with_gl_version(Version::new(3, 3))
//!     .with_profile(GlProfile::Core)
//!     .build()?;
//!
//! ctx.make_current()?;
//! let get_string = ctx.load("glGetString")?;
//! assert!(!get_string.is_null());
//! # Ok::<(), glcontext::Error>(())
//! ```
//!
//! Creation walks a fixed, documented candidate list when no explicit
//! version is requested, and never silently downgrades an explicit one.
//! When every candidate fails, the returned [`Error`] enumerates each
//! attempted backend/version pair and its failure kind, so "no GPU
//! driver", "unsupported version" and "missing platform library" stay
//! distinguishable from the outside.
//!
//! [`make_current`]: crate::context::Context::make_current
//! [`release_current`]: crate::context::Context::release_current
//! [`load`]: crate::context::Context::load
//! [`destroy`]: crate::context::Context::destroy
//! [`version`]: crate::context::Context::version
//! [`profile`]: crate::context::Context::profile
//! [`backend`]: crate::context::Context::backend

#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

mod api;
pub mod config;
pub mod context;
pub mod error;

pub use crate::config::{
    available_backends, Backend, BackendFlags, ContextBuilder, GlProfile, Version,
};
pub use crate::context::Context;
pub use crate::error::{Attempt, Error, ErrorKind, Result};
