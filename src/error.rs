//! Error handling.

use std::fmt;

/// A specialized [`Result`] type for context operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for all context operations.
#[derive(Debug, Clone)]
pub struct Error {
    /// The raw code of the underlying error.
    raw_code: Option<i64>,

    /// The raw message from the native api in case it could be obtained.
    raw_os_message: Option<String>,

    /// The simplified error kind to handle matching.
    kind: ErrorKind,

    /// Per-candidate failures collected by the creation fallback loop.
    ///
    /// Empty for errors that aren't the aggregate of a failed creation.
    attempts: Vec<Attempt>,
}

impl Error {
    pub(crate) fn new(
        raw_code: Option<i64>,
        raw_os_message: Option<String>,
        kind: ErrorKind,
    ) -> Self {
        Self { raw_code, raw_os_message, kind, attempts: Vec::new() }
    }

    pub(crate) fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(None, Some(message.into()), kind)
    }

    /// Fold every failed backend/version candidate into a single error.
    ///
    /// The resulting kind is the most diagnostic one among the attempts, so
    /// callers can still distinguish "no usable backend on this host" from
    /// "unsupported version" without inspecting the list.
    pub(crate) fn aggregate(attempts: Vec<Attempt>) -> Self {
        let kind = attempts
            .iter()
            .map(|attempt| attempt.kind)
            .max_by_key(|kind| match kind {
                ErrorKind::PlatformUnavailable => 0,
                ErrorKind::ConfigurationUnsupported => 1,
                ErrorKind::VersionUnsupported => 3,
                _ => 2,
            })
            .unwrap_or(ErrorKind::PlatformUnavailable);

        Self { raw_code: None, raw_os_message: None, kind, attempts }
    }

    /// The underlying error kind.
    #[inline]
    pub fn error_kind(&self) -> ErrorKind {
        self.kind
    }

    /// The underlying raw code in case it's present.
    #[inline]
    pub fn raw_code(&self) -> Option<i64> {
        self.raw_code
    }

    /// The backend/version candidates tried by [`ContextBuilder::build`] and
    /// the reason each one was rejected.
    ///
    /// Empty unless the error is the final result of a failed creation.
    ///
    /// [`ContextBuilder::build`]: crate::config::ContextBuilder::build
    #[inline]
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(raw_code) = self.raw_code {
            write!(f, "[{raw_code:x}] ")?;
        }

        match self.raw_os_message.as_ref() {
            Some(raw_os_message) => write!(f, "{raw_os_message}")?,
            None => write!(f, "{}", self.kind.as_str())?,
        }

        for attempt in &self.attempts {
            write!(f, "\n  {attempt}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

/// Build an error with just a kind.
impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { raw_code: None, raw_os_message: None, kind, attempts: Vec::new() }
    }
}

/// One rejected backend/version candidate from the creation fallback loop.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Human readable candidate label, e.g. `egl 3.3 core`.
    pub candidate: String,

    /// Why the candidate was rejected.
    pub kind: ErrorKind,

    /// The native detail, when one could be obtained.
    pub message: Option<String>,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.candidate, self.kind)?;
        if let Some(message) = self.message.as_ref() {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

/// A list specifying general categories of context creation and usage
/// errors.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required platform api or library is missing, e.g. there's no
    /// display server to talk to or the client library failed to load.
    PlatformUnavailable,

    /// No pixel format/framebuffer configuration matched the request.
    ConfigurationUnsupported,

    /// The requested GL version/profile was rejected by the driver.
    VersionUnsupported,

    /// The native creation call failed for an unclassified reason.
    ContextCreationFailed,

    /// Binding the context to the calling thread failed.
    MakeCurrentFailed,

    /// The handle doesn't name a live context, e.g. it was destroyed.
    BadContext,

    /// Arguments are inconsistent, e.g. sharing across different backends.
    BadMatch,

    /// The operation is not supported by the backend.
    NotSupported(&'static str),
}

impl ErrorKind {
    pub(crate) fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match *self {
            PlatformUnavailable => "platform api or library unavailable",
            ConfigurationUnsupported => "no matching framebuffer configuration",
            VersionUnsupported => "GL version or profile not supported",
            ContextCreationFailed => "native context creation failed",
            MakeCurrentFailed => "failed to make the context current",
            BadContext => "handle does not name a live context",
            BadMatch => "arguments are inconsistent",
            NotSupported(reason) => reason,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(candidate: &str, kind: ErrorKind) -> Attempt {
        Attempt { candidate: candidate.into(), kind, message: None }
    }

    #[test]
    fn aggregate_prefers_version_unsupported() {
        let error = Error::aggregate(vec![
            attempt("glx 3.3 core", ErrorKind::VersionUnsupported),
            attempt("egl", ErrorKind::PlatformUnavailable),
        ]);
        assert_eq!(error.error_kind(), ErrorKind::VersionUnsupported);
    }

    #[test]
    fn aggregate_of_missing_backends_is_platform_unavailable() {
        let error = Error::aggregate(vec![
            attempt("glx", ErrorKind::PlatformUnavailable),
            attempt("egl", ErrorKind::PlatformUnavailable),
            attempt("osmesa", ErrorKind::PlatformUnavailable),
        ]);
        assert_eq!(error.error_kind(), ErrorKind::PlatformUnavailable);
        assert_eq!(error.attempts().len(), 3);
    }

    #[test]
    fn aggregate_display_lists_every_attempt() {
        let error = Error::aggregate(vec![
            attempt("glx 3.3 core", ErrorKind::VersionUnsupported),
            attempt("glx legacy", ErrorKind::ContextCreationFailed),
        ]);
        let rendered = error.to_string();
        assert!(rendered.contains("glx 3.3 core"));
        assert!(rendered.contains("glx legacy"));
    }
}
