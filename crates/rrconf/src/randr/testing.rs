//! In-memory server used by the engine tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use rrconf_common::{Rect, Size};

use super::backend::*;
use super::display::Display;
use super::error::BackendError;
use super::gamma::{self, GammaInfo, GammaTuning};
use super::{CrtcId, ModeId, OutputId, ProtocolVersion, Rotation, WindowId, NONE};

pub const ROOT: WindowId = 0x1e1;
pub const CRTC_A: CrtcId = 0x3f;
pub const CRTC_B: CrtcId = 0x40;
pub const HDMI: OutputId = 0x41;
pub const DP: OutputId = 0x42;
pub const VGA: OutputId = 0x43;
pub const MODE_1080: ModeId = 0x48;
pub const MODE_720: ModeId = 0x49;
pub const MODE_768: ModeId = 0x4a;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    SetScreenSize(Size),
    SetCrtcConfig(CrtcId, CrtcConfig),
    SetPanning(CrtcId, Panning),
    SetTransform(CrtcId, Transform),
    SetGamma(CrtcId, GammaRamp),
    SetPrimary(OutputId),
}

pub struct FakeBackend {
    pub extension: Option<ExtensionInfo>,
    pub roots: Vec<WindowId>,
    pub timestamp: u32,
    pub config_timestamp: u32,
    pub size_range: SizeRange,
    pub screen_size: ScreenSize,
    pub modes: Vec<ModeTimings>,
    pub crtcs: BTreeMap<CrtcId, CrtcInfo>,
    pub outputs: BTreeMap<OutputId, OutputInfo>,
    pub pannings: HashMap<CrtcId, Panning>,
    pub transforms: HashMap<CrtcId, Transform>,
    pub gammas: HashMap<CrtcId, GammaRamp>,
    pub primary: OutputId,
    /// Number of upcoming `set_crtc_config` calls answered with
    /// `InvalidConfigTime`.
    pub stale_replies: u32,
    pub resource_queries: u32,
    pub calls: Vec<Call>,
    pub events: VecDeque<RandrEvent>,
}

fn timings(id: ModeId, width: u16, height: u16, dot_clock: u32, htotal: u16, vtotal: u16) -> ModeTimings {
    ModeTimings {
        id,
        name: format!("{}x{}", width, height),
        width,
        height,
        dot_clock,
        htotal,
        vtotal,
        ..Default::default()
    }
}

impl FakeBackend {
    /// One screen; HDMI-1 and DP-1 cloned on CRTC A at 1920x1080@60, CRTC B
    /// idle, VGA-1 disconnected.
    pub fn dual_head() -> Self {
        let modes = vec![
            timings(MODE_1080, 1920, 1080, 148_500_000, 2200, 1125),
            timings(MODE_720, 1280, 720, 74_250_000, 1650, 750),
            timings(MODE_768, 1024, 768, 65_000_000, 1344, 806),
        ];

        let all_rotations = Rotation::ROTATE_0
            | Rotation::ROTATE_90
            | Rotation::ROTATE_180
            | Rotation::ROTATE_270
            | Rotation::REFLECT_X
            | Rotation::REFLECT_Y;

        let mut crtcs = BTreeMap::new();
        crtcs.insert(
            CRTC_A,
            CrtcInfo {
                timestamp: 1000,
                rect: Rect::new(0, 0, 1920, 1080),
                mode: MODE_1080,
                rotation: Rotation::ROTATE_0,
                rotations: all_rotations,
                outputs: vec![HDMI, DP],
                possible: vec![HDMI, DP, VGA],
            },
        );
        crtcs.insert(
            CRTC_B,
            CrtcInfo {
                timestamp: 1000,
                rect: Rect::default(),
                mode: NONE,
                rotation: Rotation::ROTATE_0,
                rotations: Rotation::ROTATE_0 | Rotation::ROTATE_180,
                outputs: vec![],
                possible: vec![HDMI, DP, VGA],
            },
        );

        let output = |name: &str, connection, crtc, modes: Vec<ModeId>| OutputInfo {
            timestamp: 1000,
            name: name.to_string(),
            connection,
            crtc,
            crtcs: vec![CRTC_A, CRTC_B],
            modes,
            preferred: 1,
        };
        let mut outputs = BTreeMap::new();
        outputs.insert(
            HDMI,
            output("HDMI-1", Connection::Connected, CRTC_A, vec![MODE_1080, MODE_720, MODE_768]),
        );
        outputs.insert(DP, output("DP-1", Connection::Connected, CRTC_A, vec![MODE_1080, MODE_720]));
        outputs.insert(VGA, output("VGA-1", Connection::Disconnected, NONE, vec![]));

        let identity = gamma::encode(&GammaInfo::default(), 256);
        let mut gammas = HashMap::new();
        gammas.insert(CRTC_A, identity.clone());
        gammas.insert(CRTC_B, identity);

        Self {
            extension: Some(ExtensionInfo {
                version: ProtocolVersion::new(1, 3),
                event_base: 89,
                error_base: 147,
            }),
            roots: vec![ROOT],
            timestamp: 1000,
            config_timestamp: 900,
            size_range: SizeRange {
                min: Size::new(320, 200),
                max: Size::new(8192, 8192),
            },
            screen_size: ScreenSize {
                pixels: Size::new(1920, 1080),
                millimeters: Size::new(508, 285),
            },
            modes,
            crtcs,
            outputs,
            pannings: HashMap::new(),
            transforms: HashMap::new(),
            gammas,
            primary: HDMI,
            stale_replies: 0,
            resource_queries: 0,
            calls: Vec::new(),
            events: VecDeque::new(),
        }
    }

    pub fn with_version(mut self, major: u32, minor: u32) -> Self {
        if let Some(ext) = self.extension.as_mut() {
            ext.version = ProtocolVersion::new(major, minor);
        }
        self
    }

    pub fn crtc_configs(&self) -> Vec<(CrtcId, CrtcConfig)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::SetCrtcConfig(id, config) => Some((*id, config.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn screen_sizes(&self) -> Vec<Size> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::SetScreenSize(size) => Some(*size),
                _ => None,
            })
            .collect()
    }

    fn mode_size(&self, mode: ModeId) -> Size {
        self.modes
            .iter()
            .find(|m| m.id == mode)
            .map(|m| Size::new(m.width as i32, m.height as i32))
            .unwrap_or_default()
    }

    fn bump(&mut self) -> u32 {
        self.timestamp += 1;
        self.timestamp
    }
}

fn missing(what: &str, id: u32) -> BackendError {
    BackendError::Protocol(format!("no such {} {}", what, id))
}

impl RandrBackend for FakeBackend {
    fn extension(&mut self) -> BackendResult<Option<ExtensionInfo>> {
        Ok(self.extension)
    }

    fn screen_roots(&self) -> Vec<WindowId> {
        self.roots.clone()
    }

    fn screen_resources(&mut self, _root: WindowId) -> BackendResult<ScreenResources> {
        self.resource_queries += 1;
        Ok(ScreenResources {
            timestamp: self.timestamp,
            config_timestamp: self.config_timestamp,
            crtcs: self.crtcs.keys().copied().collect(),
            outputs: self.outputs.keys().copied().collect(),
            modes: self.modes.clone(),
        })
    }

    fn screen_size_range(&mut self, _root: WindowId) -> BackendResult<SizeRange> {
        Ok(self.size_range)
    }

    fn screen_size(&mut self, _root: WindowId) -> BackendResult<ScreenSize> {
        Ok(self.screen_size)
    }

    fn set_screen_size(&mut self, _root: WindowId, size: ScreenSize) -> BackendResult<()> {
        self.calls.push(Call::SetScreenSize(size.pixels));
        self.screen_size = size;
        Ok(())
    }

    fn config_times(&mut self, _root: WindowId) -> BackendResult<ConfigTimes> {
        Ok(ConfigTimes {
            timestamp: self.timestamp,
            config_timestamp: self.config_timestamp,
        })
    }

    fn crtc_info(&mut self, crtc: CrtcId, _config_timestamp: u32) -> BackendResult<CrtcInfo> {
        self.crtcs.get(&crtc).cloned().ok_or_else(|| missing("crtc", crtc))
    }

    fn set_crtc_config(
        &mut self,
        crtc: CrtcId,
        config: &CrtcConfig,
        _timestamp: u32,
        _config_timestamp: u32,
    ) -> BackendResult<SetConfigReply> {
        self.calls.push(Call::SetCrtcConfig(crtc, config.clone()));

        if self.stale_replies > 0 {
            self.stale_replies -= 1;
            return Ok(SetConfigReply {
                status: SetConfigStatus::InvalidConfigTime,
                timestamp: self.timestamp,
            });
        }

        let mut size = self.mode_size(config.mode);
        if config.rotation.swaps_axes() {
            size = size.transposed();
        }
        let timestamp = self.bump();
        let info = self.crtcs.get_mut(&crtc).ok_or_else(|| missing("crtc", crtc))?;
        let previous = std::mem::replace(&mut info.outputs, config.outputs.clone());
        info.timestamp = timestamp;
        info.mode = config.mode;
        info.rotation = config.rotation;
        info.rect = if config.mode == NONE {
            Rect::default()
        } else {
            Rect::new(config.x, config.y, size.width, size.height)
        };

        for id in previous {
            if let Some(output) = self.outputs.get_mut(&id) {
                output.crtc = NONE;
            }
        }
        for id in &config.outputs {
            if let Some(output) = self.outputs.get_mut(id) {
                output.crtc = crtc;
            }
        }

        Ok(SetConfigReply {
            status: SetConfigStatus::Success,
            timestamp,
        })
    }

    fn panning(&mut self, crtc: CrtcId) -> BackendResult<Panning> {
        Ok(self.pannings.get(&crtc).copied().unwrap_or_default())
    }

    fn set_panning(&mut self, crtc: CrtcId, panning: &Panning, _timestamp: u32) -> BackendResult<SetConfigReply> {
        self.calls.push(Call::SetPanning(crtc, *panning));
        self.pannings.insert(crtc, *panning);
        Ok(SetConfigReply {
            status: SetConfigStatus::Success,
            timestamp: self.timestamp,
        })
    }

    fn crtc_transform(&mut self, crtc: CrtcId) -> BackendResult<Transform> {
        Ok(self.transforms.get(&crtc).copied().unwrap_or_else(Transform::identity))
    }

    fn set_crtc_transform(&mut self, crtc: CrtcId, transform: &Transform, _filter: &str) -> BackendResult<()> {
        self.calls.push(Call::SetTransform(crtc, *transform));
        self.transforms.insert(crtc, *transform);
        Ok(())
    }

    fn gamma_size(&mut self, crtc: CrtcId) -> BackendResult<usize> {
        Ok(self.gammas.get(&crtc).map(GammaRamp::size).unwrap_or(0))
    }

    fn gamma(&mut self, crtc: CrtcId) -> BackendResult<GammaRamp> {
        self.gammas.get(&crtc).cloned().ok_or_else(|| missing("gamma ramp", crtc))
    }

    fn set_gamma(&mut self, crtc: CrtcId, ramp: &GammaRamp) -> BackendResult<()> {
        self.calls.push(Call::SetGamma(crtc, ramp.clone()));
        self.gammas.insert(crtc, ramp.clone());
        Ok(())
    }

    fn output_info(&mut self, output: OutputId, _config_timestamp: u32) -> BackendResult<OutputInfo> {
        self.outputs.get(&output).cloned().ok_or_else(|| missing("output", output))
    }

    fn output_primary(&mut self, _root: WindowId) -> BackendResult<OutputId> {
        Ok(self.primary)
    }

    fn set_output_primary(&mut self, _root: WindowId, output: OutputId) -> BackendResult<()> {
        self.calls.push(Call::SetPrimary(output));
        self.primary = output;
        Ok(())
    }

    fn select_input(&mut self, _root: WindowId) -> BackendResult<()> {
        Ok(())
    }

    fn poll_event(&mut self) -> BackendResult<Option<RandrEvent>> {
        Ok(self.events.pop_front())
    }

    fn flush(&mut self) -> BackendResult<()> {
        Ok(())
    }
}

pub fn fast_gamma() -> GammaTuning {
    GammaTuning {
        settle_delay: Duration::ZERO,
        pushes: 2,
    }
}

/// A loaded display over `backend` with the gamma settle delay disabled.
pub fn display(backend: FakeBackend) -> Display<FakeBackend> {
    Display::with_gamma_tuning(backend, fast_gamma())
}
