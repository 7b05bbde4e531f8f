//! Context configuration and creation policy.
//!
//! The [`ContextBuilder`] is the input to [`build`]: the requested GL
//! version/profile, an optional backend override, optional sharing with an
//! existing [`Context`] and the size of the offscreen color buffer backing
//! the context on backends that need one.
//!
//! [`build`]: ContextBuilder::build
//! [`Context`]: crate::context::Context

use std::fmt;

use bitflags::bitflags;

use crate::context::Context;

/// The GL version.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Version {
    /// Major version of the GL.
    pub major: u8,
    /// Minor version of the GL.
    pub minor: u8,
}

impl Version {
    /// Create a new version with the given `major` and `minor`.
    #[inline]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The profile a context should be created with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum GlProfile {
    /// A core profile without deprecated functionality.
    Core,

    /// A compatibility profile, including deprecated functionality.
    Compatibility,

    /// An OpenGL ES profile. Only some backends can provide it.
    Es,
}

/// The context creation api the handle is backed by.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Backend {
    /// WGL on Windows.
    Wgl,

    /// GLX over an X11 display.
    Glx,

    /// EGL, with a surfaceless or pbuffer target.
    Egl,

    /// CGL on macOS; no drawable is required for offscreen work.
    Cgl,

    /// The OSMesa software rasterizer rendering into a memory buffer.
    OsMesa,
}

impl Backend {
    /// Stable lowercase name, as used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Wgl => "wgl",
            Backend::Glx => "glx",
            Backend::Egl => "egl",
            Backend::Cgl => "cgl",
            Backend::OsMesa => "osmesa",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// The backends this build of the crate can try at all.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BackendFlags: u32 {
        /// WGL on Windows.
        const WGL    = 0b0000_0001;
        /// GLX over an X11 display.
        const GLX    = 0b0000_0010;
        /// EGL.
        const EGL    = 0b0000_0100;
        /// CGL on macOS.
        const CGL    = 0b0000_1000;
        /// The OSMesa software rasterizer.
        const OSMESA = 0b0001_0000;
    }
}

/// The set of backends compiled into this build.
///
/// A backend being present here only means it can be attempted; its native
/// library may still be missing at run time.
pub fn available_backends() -> BackendFlags {
    let mut flags = BackendFlags::empty();
    #[cfg(wgl_backend)]
    flags.insert(BackendFlags::WGL);
    #[cfg(glx_backend)]
    flags.insert(BackendFlags::GLX);
    #[cfg(egl_backend)]
    flags.insert(BackendFlags::EGL);
    #[cfg(cgl_backend)]
    flags.insert(BackendFlags::CGL);
    #[cfg(osmesa_backend)]
    flags.insert(BackendFlags::OSMESA);
    flags
}

/// A builder for a headless [`Context`].
///
/// The configuration is immutable once passed to [`build`].
///
/// [`build`]: Self::build
/// [`Context`]: crate::context::Context
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder<'a> {
    pub(crate) version: Option<Version>,
    pub(crate) profile: Option<GlProfile>,
    pub(crate) backend: Option<Backend>,
    pub(crate) force_software: bool,
    pub(crate) sharing: Option<&'a Context>,
    pub(crate) size: Option<(u32, u32)>,
}

impl<'a> ContextBuilder<'a> {
    /// A builder requesting no particular version: the highest candidate
    /// from a fixed descending list that the driver accepts wins.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an exact GL version. Creation fails with
    /// [`ErrorKind::VersionUnsupported`] rather than silently downgrading.
    ///
    /// [`ErrorKind::VersionUnsupported`]: crate::error::ErrorKind::VersionUnsupported
    #[inline]
    pub fn with_gl_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Request a specific profile.
    #[inline]
    pub fn with_profile(mut self, profile: GlProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Force a specific backend instead of the platform default ordering.
    #[inline]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Only consider software rasterization (OSMesa).
    #[inline]
    pub fn with_software_rendering(mut self, force_software: bool) -> Self {
        self.force_software = force_software;
        self
    }

    /// Share GL object namespaces with an existing context.
    ///
    /// The shared context must be backed by the same backend; both handles
    /// still have to be destroyed independently by their owners.
    #[inline]
    pub fn with_sharing(mut self, other: &'a Context) -> Self {
        self.sharing = Some(other);
        self
    }

    /// Size of the offscreen color buffer, in pixels.
    ///
    /// Used by the OSMesa memory target and by pbuffer-backed backends.
    /// Defaults to 1x1, which is all a loader-only context needs.
    #[inline]
    pub fn with_buffer_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }

    pub(crate) fn buffer_size(&self) -> (u32, u32) {
        let (width, height) = self.size.unwrap_or((1, 1));
        (width.max(1), height.max(1))
    }
}

/// One entry of the creation fallback list.
///
/// `version: None` is the legacy candidate: create whatever the oldest
/// native entry point hands out, with no attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) version: Option<Version>,
    pub(crate) profile: Option<GlProfile>,
}

impl Candidate {
    pub(crate) fn label(&self, backend: Backend) -> String {
        match (self.version, self.profile) {
            (Some(version), Some(GlProfile::Core)) => format!("{backend} {version} core"),
            (Some(version), Some(GlProfile::Compatibility)) => {
                format!("{backend} {version} compatibility")
            },
            (Some(version), Some(GlProfile::Es)) => format!("{backend} {version} es"),
            (Some(version), None) => format!("{backend} {version}"),
            (None, _) => format!("{backend} legacy"),
        }
    }

    /// The version/profile recorded on the handle when this candidate
    /// succeeds.
    pub(crate) fn obtained(&self) -> (Version, GlProfile) {
        match (self.version, self.profile) {
            (Some(version), Some(profile)) => (version, profile),
            (Some(version), None) => (version, GlProfile::Compatibility),
            // The legacy entry points hand out 1.x compatibility contexts.
            (None, _) => (Version::new(1, 0), GlProfile::Compatibility),
        }
    }
}

/// The fixed descending list tried when no explicit version was requested.
///
/// 3.3 core is the highest version available on every desktop platform
/// still shipping GL drivers (notably macOS), so it goes first; the legacy
/// candidate is the last resort.
const DEFAULT_CANDIDATES: &[(u8, u8, GlProfile)] = &[
    (3, 3, GlProfile::Core),
    (3, 2, GlProfile::Core),
    (3, 1, GlProfile::Compatibility),
    (3, 0, GlProfile::Compatibility),
    (2, 1, GlProfile::Compatibility),
    (2, 0, GlProfile::Compatibility),
];

/// Candidates for ES contexts when no explicit version was requested.
const ES_CANDIDATES: &[(u8, u8)] = &[(3, 1), (3, 0), (2, 0)];

/// Expand a request into the ordered candidate list.
///
/// An explicit version yields exactly one candidate: no silent downgrade.
pub(crate) fn candidates(
    version: Option<Version>,
    profile: Option<GlProfile>,
) -> Vec<Candidate> {
    if let Some(version) = version {
        return vec![Candidate { version: Some(version), profile }];
    }

    match profile {
        Some(GlProfile::Es) => ES_CANDIDATES
            .iter()
            .map(|&(major, minor)| Candidate {
                version: Some(Version::new(major, minor)),
                profile: Some(GlProfile::Es),
            })
            .collect(),
        Some(requested) => {
            let mut out: Vec<_> = DEFAULT_CANDIDATES
                .iter()
                .filter(|(_, _, profile)| *profile == requested)
                .map(|&(major, minor, profile)| Candidate {
                    version: Some(Version::new(major, minor)),
                    profile: Some(profile),
                })
                .collect();
            if requested == GlProfile::Compatibility {
                out.push(Candidate { version: None, profile: None });
            }
            out
        },
        None => {
            let mut out: Vec<_> = DEFAULT_CANDIDATES
                .iter()
                .map(|&(major, minor, profile)| Candidate {
                    version: Some(Version::new(major, minor)),
                    profile: Some(profile),
                })
                .collect();
            out.push(Candidate { version: None, profile: None });
            out
        },
    }
}

/// The backend ordering for this platform.
///
/// On Linux/BSD the absence of `$DISPLAY` is taken as the headless
/// indicator: EGL is tried before GLX since it can run without a display
/// server. OSMesa, when compiled in, is always the last resort unless
/// explicitly selected.
pub(crate) fn backend_order(builder: &ContextBuilder<'_>) -> Vec<Backend> {
    if let Some(backend) = builder.backend {
        return vec![backend];
    }

    if builder.force_software {
        return vec![Backend::OsMesa];
    }

    let mut order = Vec::with_capacity(3);

    #[cfg(windows)]
    order.push(Backend::Wgl);

    #[cfg(target_os = "macos")]
    order.push(Backend::Cgl);

    #[cfg(free_unix)]
    {
        let has_display = std::env::var_os("DISPLAY").is_some();
        if has_display {
            order.push(Backend::Glx);
            order.push(Backend::Egl);
        } else {
            order.push(Backend::Egl);
            order.push(Backend::Glx);
        }
    }

    order.push(Backend::OsMesa);
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_version_is_a_single_candidate() {
        let list = candidates(Some(Version::new(4, 1)), Some(GlProfile::Core));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].version, Some(Version::new(4, 1)));
        assert_eq!(list[0].profile, Some(GlProfile::Core));
    }

    #[test]
    fn default_candidates_descend_and_end_with_legacy() {
        let list = candidates(None, None);
        assert_eq!(list.first().unwrap().version, Some(Version::new(3, 3)));
        assert_eq!(list.first().unwrap().profile, Some(GlProfile::Core));
        assert_eq!(list.last().unwrap().version, None);

        let versions: Vec<_> = list.iter().filter_map(|c| c.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(versions, sorted);
    }

    #[test]
    fn core_only_request_never_falls_back_to_legacy() {
        let list = candidates(None, Some(GlProfile::Core));
        assert!(!list.is_empty());
        assert!(list.iter().all(|c| c.profile == Some(GlProfile::Core)));
        assert!(list.iter().all(|c| c.version.is_some()));
    }

    #[test]
    fn es_request_uses_es_candidates() {
        let list = candidates(None, Some(GlProfile::Es));
        assert_eq!(list.first().unwrap().version, Some(Version::new(3, 1)));
        assert!(list.iter().all(|c| c.profile == Some(GlProfile::Es)));
    }

    #[test]
    fn legacy_candidate_reports_a_1_0_compatibility_context() {
        let legacy = Candidate { version: None, profile: None };
        assert_eq!(legacy.obtained(), (Version::new(1, 0), GlProfile::Compatibility));
    }

    #[test]
    fn override_wins_over_everything() {
        let builder = ContextBuilder::new()
            .with_backend(Backend::OsMesa)
            .with_software_rendering(false);
        assert_eq!(backend_order(&builder), vec![Backend::OsMesa]);
    }

    #[test]
    fn software_rendering_selects_osmesa_only() {
        let builder = ContextBuilder::new().with_software_rendering(true);
        assert_eq!(backend_order(&builder), vec![Backend::OsMesa]);
    }

    #[test]
    fn buffer_size_defaults_to_one_pixel() {
        assert_eq!(ContextBuilder::new().buffer_size(), (1, 1));
        assert_eq!(ContextBuilder::new().with_buffer_size(0, 4).buffer_size(), (1, 4));
    }

    #[cfg(free_unix)]
    #[test]
    fn osmesa_is_the_last_resort_on_unix() {
        let builder = ContextBuilder::new();
        let order = backend_order(&builder);
        assert_eq!(order.last(), Some(&Backend::OsMesa));
        assert!(order.contains(&Backend::Glx));
        assert!(order.contains(&Backend::Egl));
    }
}
