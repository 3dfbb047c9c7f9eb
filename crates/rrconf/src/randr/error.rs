use rrconf_common::Size;

use super::backend::SetConfigStatus;
use super::{CrtcId, ProtocolVersion};

#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    Connection(String),
    Protocol(String),
    Unsupported(&'static str),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Connection(msg) => write!(f, "X connection error: {}", msg),
            BackendError::Protocol(msg) => write!(f, "RandR request failed: {}", msg),
            BackendError::Unsupported(what) => write!(f, "{} is not supported by this server", what),
        }
    }
}

impl std::error::Error for BackendError {}

/// Why a CRTC could not be reconfigured.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyError {
    /// No mode of the requested size is shared by all connected outputs.
    ModeUnavailable { crtc: CrtcId, size: Size },
    /// The layout does not fit the screen's maximum size.
    BoundsExceeded { crtc: CrtcId, requested: Size, max: Size },
    /// The virtual framebuffer is larger than the server allows.
    InsufficientVirtualSize { requested: Size, max: Size },
    /// The server's configuration changed since our last query.
    StaleTimestamp { crtc: CrtcId },
    Rejected { crtc: CrtcId, status: SetConfigStatus },
    Backend(BackendError),
}

impl ApplyError {
    /// Failures the user should be told about explicitly.
    pub fn is_insufficient_virtual_size(&self) -> bool {
        matches!(
            self,
            ApplyError::BoundsExceeded { .. } | ApplyError::InsufficientVirtualSize { .. }
        )
    }
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyError::ModeUnavailable { crtc, size } => {
                write!(f, "CRTC {}: no mode {} shared by all connected outputs", crtc, size)
            }
            ApplyError::BoundsExceeded { crtc, requested, max } => {
                write!(f, "CRTC {}: {} exceeds the maximum screen size {}", crtc, requested, max)
            }
            ApplyError::InsufficientVirtualSize { requested, max } => {
                write!(f, "virtual size {} exceeds the maximum screen size {}", requested, max)
            }
            ApplyError::StaleTimestamp { crtc } => {
                write!(f, "CRTC {}: configuration timestamp is out of date", crtc)
            }
            ApplyError::Rejected { crtc, status } => {
                write!(f, "CRTC {}: server rejected the configuration ({:?})", crtc, status)
            }
            ApplyError::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplyError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for ApplyError {
    fn from(e: BackendError) -> Self {
        ApplyError::Backend(e)
    }
}

/// Why a [`Display`](super::display::Display) could not be opened. Any of
/// these leaves the display invalid and all hardware operations no-ops.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayError {
    ExtensionUnavailable,
    VersionTooOld(ProtocolVersion),
    Backend(BackendError),
}

impl std::fmt::Display for DisplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayError::ExtensionUnavailable => write!(f, "the X server has no RandR extension"),
            DisplayError::VersionTooOld(version) => {
                write!(f, "RandR {} is too old, at least 1.2 is required", version)
            }
            DisplayError::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DisplayError {}

impl From<BackendError> for DisplayError {
    fn from(e: BackendError) -> Self {
        DisplayError::Backend(e)
    }
}
