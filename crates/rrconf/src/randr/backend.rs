//! The hardware boundary: every RandR request the engine issues.

use rrconf_common::{Rect, Size};

use super::error::BackendError;
use super::{CrtcId, ModeId, OutputId, ProtocolVersion, Rotation, WindowId};

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub version: ProtocolVersion,
    pub event_base: u8,
    pub error_base: u8,
}

/// Raw mode line as reported by the server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModeTimings {
    pub id: ModeId,
    pub name: String,
    pub width: u16,
    pub height: u16,
    pub dot_clock: u32,
    pub htotal: u16,
    pub vtotal: u16,
    pub double_scan: bool,
    pub interlace: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScreenResources {
    pub timestamp: u32,
    pub config_timestamp: u32,
    pub crtcs: Vec<CrtcId>,
    pub outputs: Vec<OutputId>,
    pub modes: Vec<ModeTimings>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeRange {
    pub min: Size,
    pub max: Size,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScreenSize {
    pub pixels: Size,
    pub millimeters: Size,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfigTimes {
    pub timestamp: u32,
    pub config_timestamp: u32,
}

/// CRTC state as the server reports it. `rect` is the footprint on the
/// screen, so its size is already rotated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CrtcInfo {
    pub timestamp: u32,
    pub rect: Rect,
    pub mode: ModeId,
    pub rotation: Rotation,
    pub rotations: Rotation,
    pub outputs: Vec<OutputId>,
    pub possible: Vec<OutputId>,
}

/// What `set_crtc_config` sends. An empty `outputs` with mode `NONE`
/// disables the CRTC.
#[derive(Clone, Debug, PartialEq)]
pub struct CrtcConfig {
    pub x: i32,
    pub y: i32,
    pub mode: ModeId,
    pub rotation: Rotation,
    pub outputs: Vec<OutputId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connection {
    Connected,
    Disconnected,
    Unknown,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutputInfo {
    pub timestamp: u32,
    pub name: String,
    pub connection: Connection,
    pub crtc: CrtcId,
    pub crtcs: Vec<CrtcId>,
    pub modes: Vec<ModeId>,
    pub preferred: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Panning {
    pub rect: Rect,
    pub track: Rect,
    pub border: [i16; 4],
}

/// Projective transform applied by the CRTC, row-major.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub matrix: [[f64; 3]; 3],
}

impl Transform {
    pub fn identity() -> Self {
        Self::scale(1.0, 1.0)
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            matrix: [[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Compares at 16.16 fixed-point resolution, which is what the server
    /// stores.
    pub fn is_identity(&self) -> bool {
        let identity = Transform::identity();
        self.matrix
            .iter()
            .flatten()
            .zip(identity.matrix.iter().flatten())
            .all(|(a, b)| (a - b).abs() < 1.0 / 65536.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GammaRamp {
    pub red: Vec<u16>,
    pub green: Vec<u16>,
    pub blue: Vec<u16>,
}

impl GammaRamp {
    pub fn size(&self) -> usize {
        self.red.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetConfigStatus {
    Success,
    InvalidConfigTime,
    InvalidTime,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetConfigReply {
    pub status: SetConfigStatus,
    pub timestamp: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CrtcChange {
    pub window: WindowId,
    pub crtc: CrtcId,
    pub mode: ModeId,
    pub rotation: Rotation,
    pub rect: Rect,
    pub timestamp: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutputChange {
    pub window: WindowId,
    pub output: OutputId,
    pub crtc: CrtcId,
    pub mode: ModeId,
    pub rotation: Rotation,
    pub connection: Connection,
    pub timestamp: u32,
    pub config_timestamp: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RandrEvent {
    ScreenChange {
        root: WindowId,
        window: WindowId,
        timestamp: u32,
        config_timestamp: u32,
        size: Size,
        rotation: Rotation,
    },
    Crtc(CrtcChange),
    Output(OutputChange),
}

impl RandrEvent {
    /// Window the notification was selected on.
    pub fn window(&self) -> WindowId {
        match self {
            RandrEvent::ScreenChange { window, .. } => *window,
            RandrEvent::Crtc(change) => change.window,
            RandrEvent::Output(change) => change.window,
        }
    }
}

pub trait RandrBackend {
    /// `None` when the server has no RandR extension.
    fn extension(&mut self) -> BackendResult<Option<ExtensionInfo>>;
    /// Root windows, indexed by screen number.
    fn screen_roots(&self) -> Vec<WindowId>;
    fn screen_resources(&mut self, root: WindowId) -> BackendResult<ScreenResources>;
    fn screen_size_range(&mut self, root: WindowId) -> BackendResult<SizeRange>;
    fn screen_size(&mut self, root: WindowId) -> BackendResult<ScreenSize>;
    fn set_screen_size(&mut self, root: WindowId, size: ScreenSize) -> BackendResult<()>;
    fn config_times(&mut self, root: WindowId) -> BackendResult<ConfigTimes>;

    fn crtc_info(&mut self, crtc: CrtcId, config_timestamp: u32) -> BackendResult<CrtcInfo>;
    fn set_crtc_config(
        &mut self,
        crtc: CrtcId,
        config: &CrtcConfig,
        timestamp: u32,
        config_timestamp: u32,
    ) -> BackendResult<SetConfigReply>;

    fn panning(&mut self, crtc: CrtcId) -> BackendResult<Panning>;
    fn set_panning(&mut self, crtc: CrtcId, panning: &Panning, timestamp: u32) -> BackendResult<SetConfigReply>;
    fn crtc_transform(&mut self, crtc: CrtcId) -> BackendResult<Transform>;
    fn set_crtc_transform(&mut self, crtc: CrtcId, transform: &Transform, filter: &str) -> BackendResult<()>;

    fn gamma_size(&mut self, crtc: CrtcId) -> BackendResult<usize>;
    fn gamma(&mut self, crtc: CrtcId) -> BackendResult<GammaRamp>;
    fn set_gamma(&mut self, crtc: CrtcId, ramp: &GammaRamp) -> BackendResult<()>;

    fn output_info(&mut self, output: OutputId, config_timestamp: u32) -> BackendResult<OutputInfo>;
    fn output_primary(&mut self, root: WindowId) -> BackendResult<OutputId>;
    fn set_output_primary(&mut self, root: WindowId, output: OutputId) -> BackendResult<()>;

    fn select_input(&mut self, root: WindowId) -> BackendResult<()>;
    fn poll_event(&mut self) -> BackendResult<Option<RandrEvent>>;
    fn flush(&mut self) -> BackendResult<()>;
}
