use std::collections::{BTreeMap, HashMap};

use rrconf_common::{Point, Rect, Size};

use super::backend::{CrtcChange, CrtcConfig, CrtcInfo, Panning, SetConfigStatus, Transform};
use super::error::{ApplyError, BackendError};
use super::gamma::{self, GammaInfo};
use super::mode::Mode;
use super::output::Output;
use super::screen::ScreenBounds;
use super::{Changes, CrtcId, HwContext, ModeId, OutputId, Rotation, NONE};

/// Filter used for the scaling transform of virtual mode.
pub const SCALE_FILTER: &str = "bilinear";

/// One snapshot of everything a CRTC can be told to do.
///
/// `rect` is the position plus the unrotated mode size; see
/// [`CrtcState::footprint`] for the area actually covered on the screen.
#[derive(Clone, Debug, PartialEq)]
pub struct CrtcState {
    pub rect: Rect,
    pub rotation: Rotation,
    pub refresh_rate: f64,
    pub gamma: GammaInfo,
    pub virtual_rect: Rect,
    pub tracking: bool,
    pub virtual_mode_enabled: bool,
}

impl Default for CrtcState {
    fn default() -> Self {
        Self {
            rect: Rect::default(),
            rotation: Rotation::ROTATE_0,
            refresh_rate: 0.0,
            gamma: GammaInfo::default(),
            virtual_rect: Rect::default(),
            tracking: true,
            virtual_mode_enabled: false,
        }
    }
}

impl CrtcState {
    pub fn footprint(&self) -> Rect {
        if self.rotation.swaps_axes() {
            self.rect.with_size(self.rect.size().transposed())
        } else {
            self.rect
        }
    }

    pub fn brightness(&self) -> f64 {
        self.gamma.brightness
    }

    /// Scale from the mode to the virtual size, identity unless virtual mode
    /// is on without tracking.
    pub fn scale_transform(&self) -> Transform {
        if self.tracking || !self.virtual_mode_enabled || self.rect.is_empty() {
            return Transform::identity();
        }
        let virtual_size = self.virtual_rect.size();
        Transform::scale(
            virtual_size.width as f64 / self.rect.width as f64,
            virtual_size.height as f64 / self.rect.height as f64,
        )
    }
}

/// Disjoint borrows of the owning screen handed to [`Crtc::apply_proposed`].
pub struct CrtcEnv<'a, 'h> {
    pub hw: &'a mut HwContext<'h>,
    pub bounds: &'a mut ScreenBounds,
    pub modes: &'a HashMap<ModeId, Mode>,
    pub outputs: &'a BTreeMap<OutputId, Output>,
    pub config_timestamp: u32,
}

#[derive(Clone, Debug)]
pub struct Crtc {
    id: CrtcId,
    rotations: Rotation,
    current_mode: ModeId,
    connected_outputs: Vec<OutputId>,
    current_outputs: Vec<OutputId>,
    original_outputs: Vec<OutputId>,
    possible_outputs: Vec<OutputId>,
    current: CrtcState,
    original: CrtcState,
    proposed: CrtcState,
}

impl Crtc {
    pub fn new(id: CrtcId) -> Self {
        Self {
            id,
            rotations: Rotation::ROTATE_0,
            current_mode: NONE,
            connected_outputs: Vec::new(),
            current_outputs: Vec::new(),
            original_outputs: Vec::new(),
            possible_outputs: Vec::new(),
            current: CrtcState::default(),
            original: CrtcState::default(),
            proposed: CrtcState::default(),
        }
    }

    /// Refreshes the current snapshot from the server and resets the
    /// proposal to it.
    pub fn load_settings(
        &mut self,
        hw: &mut HwContext<'_>,
        config_timestamp: u32,
        modes: &HashMap<ModeId, Mode>,
    ) -> Result<Changes, BackendError> {
        log::debug!("Querying information about CRTC {}", self.id);

        let info = hw.backend.crtc_info(self.id, config_timestamp)?;
        hw.timestamp.advance(info.timestamp);
        let mut changes = self.update_from(&info, modes);

        if hw.version.has_1_3() {
            let panning = hw.backend.panning(self.id)?;
            let transform = hw.backend.crtc_transform(self.id)?;
            let footprint = self.current.footprint();

            let virtual_mode_enabled =
                !panning.rect.is_empty() && panning.rect.size() != footprint.size();
            let tracking = transform.is_identity();

            if panning.rect != self.current.virtual_rect
                || virtual_mode_enabled != self.current.virtual_mode_enabled
                || tracking != self.current.tracking
            {
                self.current.virtual_rect = panning.rect;
                self.current.virtual_mode_enabled = virtual_mode_enabled;
                self.current.tracking = tracking;
                changes |= Changes::VIRTUAL_RECT;
            }
        }

        match hw.backend.gamma(self.id) {
            Ok(ramp) => match gamma::decode(&ramp) {
                Some(info) if info != self.current.gamma => {
                    self.current.gamma = info;
                    changes |= Changes::BRIGHTNESS;
                }
                Some(_) => {}
                None => log::debug!("CRTC {}: unusable gamma ramp, keeping previous values", self.id),
            },
            Err(e) => log::debug!("CRTC {}: gamma query failed: {}", self.id, e),
        }

        self.proposed = self.current.clone();
        self.connected_outputs = self.current_outputs.clone();
        Ok(changes)
    }

    /// Folds a CRTC query reply into the current snapshot.
    pub(crate) fn update_from(&mut self, info: &CrtcInfo, modes: &HashMap<ModeId, Mode>) -> Changes {
        let mut changes = Changes::empty();

        self.rotations = info.rotations;
        self.possible_outputs = info.possible.clone();

        if info.mode != self.current_mode {
            self.current_mode = info.mode;
            changes |= Changes::MODE;
        }
        if info.rotation != self.current.rotation {
            self.current.rotation = info.rotation;
            changes |= Changes::ROTATION;
        }

        let size = if info.rotation.swaps_axes() {
            info.rect.size().transposed()
        } else {
            info.rect.size()
        };
        let rect = Rect::from_parts(info.rect.origin(), size);
        if rect != self.current.rect {
            self.current.rect = rect;
            changes |= Changes::RECT;
        }

        let rate = modes.get(&info.mode).map(Mode::refresh_rate).unwrap_or(0.0);
        if rate != self.current.refresh_rate {
            self.current.refresh_rate = rate;
            changes |= Changes::RATE;
        }

        if info.outputs != self.current_outputs {
            self.current_outputs = info.outputs.clone();
            changes |= Changes::OUTPUTS;
        }

        changes
    }

    /// CRTC-change notification. Only mode, rotation and geometry are carried
    /// by the event; gamma and panning wait for the next full load.
    pub fn handle_event(&mut self, change: &CrtcChange, modes: &HashMap<ModeId, Mode>) -> Changes {
        let pending = self.proposed_changed();
        let mut changes = Changes::empty();

        if change.mode != self.current_mode {
            changes |= Changes::MODE;
            self.current_mode = change.mode;
            let rate = modes.get(&change.mode).map(Mode::refresh_rate).unwrap_or(0.0);
            if rate != self.current.refresh_rate {
                self.current.refresh_rate = rate;
                changes |= Changes::RATE;
            }
        }
        if change.rotation != self.current.rotation {
            changes |= Changes::ROTATION;
            self.current.rotation = change.rotation;
        }
        if change.rect.origin() != self.current.rect.origin() {
            changes |= Changes::RECT;
            self.current.rect = self.current.rect.with_origin(change.rect.origin());
        }

        // The event's own width and height are unreliable; use the mode.
        let size = modes.get(&self.current_mode).map(Mode::size).unwrap_or_default();
        if size != self.current.rect.size() {
            changes |= Changes::RECT;
            self.current.rect = self.current.rect.with_size(size);
        }

        if !changes.is_empty() {
            log::debug!("CRTC {} event: {:?}", self.id, changes);
            if !pending {
                self.proposed = self.current.clone();
            }
        }
        changes
    }

    pub fn id(&self) -> CrtcId {
        self.id
    }

    pub fn rotations(&self) -> Rotation {
        self.rotations
    }

    pub fn rotation(&self) -> Rotation {
        self.current.rotation
    }

    pub fn rect(&self) -> Rect {
        self.current.rect
    }

    pub fn footprint(&self) -> Rect {
        self.current.footprint()
    }

    pub fn refresh_rate(&self) -> f64 {
        self.current.refresh_rate
    }

    pub fn brightness(&self) -> f64 {
        self.current.brightness()
    }

    pub fn virtual_rect(&self) -> Rect {
        self.current.virtual_rect
    }

    pub fn tracking(&self) -> bool {
        self.current.tracking
    }

    pub fn virtual_mode_enabled(&self) -> bool {
        self.current.virtual_mode_enabled
    }

    pub fn current_mode(&self) -> ModeId {
        self.current_mode
    }

    pub fn is_enabled(&self) -> bool {
        self.current_mode != NONE
    }

    pub fn current(&self) -> &CrtcState {
        &self.current
    }

    pub fn original(&self) -> &CrtcState {
        &self.original
    }

    pub fn proposed(&self) -> &CrtcState {
        &self.proposed
    }

    pub fn connected_outputs(&self) -> &[OutputId] {
        &self.connected_outputs
    }

    pub fn possible_outputs(&self) -> &[OutputId] {
        &self.possible_outputs
    }

    pub fn propose_size(&mut self, size: Size) -> bool {
        self.proposed.rect = self.proposed.rect.with_size(size);
        self.proposed.refresh_rate = 0.0;
        true
    }

    pub fn propose_position(&mut self, position: Point) -> bool {
        self.proposed.rect = self.proposed.rect.with_origin(position);
        true
    }

    pub fn propose_rotation(&mut self, rotation: Rotation) -> bool {
        if rotation.is_empty() || !self.rotations.contains(rotation) {
            return false;
        }
        self.proposed.rotation = rotation;
        true
    }

    pub fn propose_refresh_rate(&mut self, rate: f64) -> bool {
        if !rate.is_finite() || rate < 0.0 {
            return false;
        }
        self.proposed.refresh_rate = rate;
        true
    }

    pub fn propose_brightness(&mut self, brightness: f64) -> bool {
        if !brightness.is_finite() || brightness < 0.0 {
            return false;
        }
        self.proposed.gamma.brightness = brightness;
        true
    }

    pub fn propose_virtual_size(&mut self, size: Size) -> bool {
        self.proposed.virtual_rect = self.proposed.virtual_rect.with_size(size);
        true
    }

    pub fn propose_tracking(&mut self, tracking: bool) -> bool {
        self.proposed.tracking = tracking;
        true
    }

    pub fn propose_virtual_mode_enabled(&mut self, enabled: bool) -> bool {
        self.proposed.virtual_mode_enabled = enabled;
        true
    }

    /// Discards pending edits in favour of the session checkpoint.
    pub fn propose_original(&mut self) {
        self.proposed = self.original.clone();
        self.connected_outputs = self.original_outputs.clone();
    }

    /// Checkpoints the current hardware state for a later revert.
    pub fn set_original(&mut self) {
        self.original = self.current.clone();
        self.original_outputs = self.current_outputs.clone();
    }

    pub fn proposed_changed(&self) -> bool {
        self.proposed != self.current || self.connected_outputs != self.current_outputs
    }

    /// Stages `output` on this CRTC, optionally with a new mode size.
    /// Fails if the output can't be driven from here.
    pub fn add_output(&mut self, output: OutputId, size: Option<Size>) -> bool {
        if !self.connected_outputs.contains(&output) {
            if !self.possible_outputs.contains(&output) {
                return false;
            }
            self.connected_outputs.push(output);
        }
        if let Some(size) = size.filter(|s| !s.is_empty()) {
            self.propose_size(size);
        }
        true
    }

    pub fn remove_output(&mut self, output: OutputId) -> bool {
        let before = self.connected_outputs.len();
        self.connected_outputs.retain(|&o| o != output);
        self.connected_outputs.len() != before
    }

    pub(crate) fn restore_proposal(&mut self, proposed: CrtcState, outputs: Vec<OutputId>) {
        self.proposed = proposed;
        self.connected_outputs = outputs;
    }

    /// Modes usable by every staged output, in the first output's order.
    pub fn modes(&self, outputs: &BTreeMap<OutputId, Output>) -> Vec<ModeId> {
        let mut staged = self.connected_outputs.iter().map(|id| outputs.get(id));
        let Some(Some(first)) = staged.next() else {
            return Vec::new();
        };

        let mut list = first.modes().to_vec();
        for output in staged {
            match output {
                Some(output) => list.retain(|m| output.modes().contains(m)),
                None => list.clear(),
            }
        }
        list
    }

    fn resolve_mode(
        &self,
        modes: &HashMap<ModeId, Mode>,
        outputs: &BTreeMap<OutputId, Output>,
    ) -> Result<Mode, ApplyError> {
        let proposed = &self.proposed;
        let current = &self.current;

        let mode = if proposed.rect.size() == current.rect.size()
            && proposed.refresh_rate == current.refresh_rate
        {
            modes.get(&self.current_mode).cloned().unwrap_or_else(Mode::null)
        } else {
            let matching: Vec<&Mode> = self
                .modes(outputs)
                .iter()
                .filter_map(|id| modes.get(id))
                .filter(|m| m.size() == proposed.rect.size())
                .collect();

            matching
                .iter()
                .find(|m| rate_matches(m.refresh_rate(), proposed.refresh_rate))
                .or_else(|| matching.first())
                .map(|m| Mode::clone(m))
                .unwrap_or_else(Mode::null)
        };

        if self.connected_outputs.is_empty() {
            return Ok(Mode::null());
        }
        if !mode.is_valid() {
            return Err(ApplyError::ModeUnavailable {
                crtc: self.id,
                size: proposed.rect.size(),
            });
        }
        Ok(mode)
    }

    /// Makes sure the screen can hold the proposed footprint, growing it if
    /// needed.
    fn ensure_bounds(&self, env: &mut CrtcEnv<'_, '_>) -> Result<(), ApplyError> {
        let max = env.bounds.max_size();
        let footprint = self.proposed.footprint();
        let exceeded = |r: Rect| ApplyError::BoundsExceeded {
            crtc: self.id,
            requested: Size::new(r.right(), r.bottom()),
            max,
        };

        if self.current.rotation.is_equivalent(self.proposed.rotation) {
            if !max.fits(Size::new(footprint.right(), footprint.bottom())) {
                return Err(exceeded(footprint));
            }
            if !env.bounds.rect().contains(&footprint) && !env.bounds.adjust_size(env.hw, footprint)? {
                return Err(exceeded(footprint));
            }
        } else if !env.bounds.rect().contains(&footprint) {
            let target = env.bounds.rect().union(&footprint);
            if !max.fits(Size::new(target.right(), target.bottom())) {
                return Err(exceeded(target));
            }
            let target = target.union(&self.current.footprint());
            if !env.bounds.adjust_size(env.hw, target)? {
                return Err(exceeded(target));
            }
        }
        Ok(())
    }

    /// Reconciles the proposal with the hardware. On success the current
    /// snapshot equals the proposal; on failure nothing in `self` changes.
    pub fn apply_proposed(&mut self, env: &mut CrtcEnv<'_, '_>) -> Result<Changes, ApplyError> {
        if !self.proposed_changed() {
            log::debug!("CRTC {}: nothing to apply", self.id);
            return Ok(Changes::empty());
        }

        let proposed = self.proposed.clone();
        log::debug!("Applying proposed changes for CRTC {}", self.id);
        log::debug!("    screen rect: {}", env.bounds.rect());
        log::debug!("    current: {} {:?}", self.current.rect, self.current.rotation);
        log::debug!(
            "    proposed: {} {:?} @ {:.2} Hz, brightness {:.2}, outputs {:?}",
            proposed.rect,
            proposed.rotation,
            proposed.refresh_rate,
            proposed.brightness(),
            self.connected_outputs
        );

        let mode = self.resolve_mode(env.modes, env.outputs)?;
        let enabling = mode.is_valid();

        if enabling {
            self.ensure_bounds(env)?;
        }

        if enabling && proposed.virtual_mode_enabled {
            let virtual_size = proposed.virtual_rect.size();
            let max = env.bounds.max_size();
            if !max.fits(virtual_size) {
                return Err(ApplyError::InsufficientVirtualSize {
                    requested: virtual_size,
                    max,
                });
            }
            env.bounds.set_size(env.hw, virtual_size)?;
        }

        if enabling && env.hw.version.has_1_3() {
            let transform = proposed.scale_transform();
            env.hw.backend.set_crtc_transform(self.id, &transform, SCALE_FILTER)?;
            log::debug!(
                "CRTC {}: scale {:.3}x{:.3}",
                self.id,
                transform.matrix[0][0],
                transform.matrix[1][1]
            );
        }

        let footprint = proposed.footprint();
        let config = CrtcConfig {
            x: if enabling { footprint.x } else { 0 },
            y: if enabling { footprint.y } else { 0 },
            mode: mode.id(),
            rotation: proposed.rotation,
            outputs: if enabling {
                self.connected_outputs.clone()
            } else {
                Vec::new()
            },
        };
        let reply = env.hw.backend.set_crtc_config(
            self.id,
            &config,
            env.hw.timestamp.get(),
            env.config_timestamp,
        )?;

        match reply.status {
            SetConfigStatus::Success => {}
            SetConfigStatus::InvalidConfigTime | SetConfigStatus::InvalidTime => {
                log::warn!("Failed to apply changes for CRTC {}: stale timestamp", self.id);
                return Err(ApplyError::StaleTimestamp { crtc: self.id });
            }
            status => {
                log::warn!("Failed to apply changes for CRTC {}: {:?}", self.id, status);
                return Err(ApplyError::Rejected { crtc: self.id, status });
            }
        }
        env.hw.timestamp.advance(reply.timestamp);

        // Panning outlives mode changes, so leaving virtual mode has to
        // clear it or the next load reads the old area back.
        let clear_panning = enabling
            && !proposed.virtual_mode_enabled
            && self.current.virtual_mode_enabled
            && env.hw.version.has_1_3();
        if enabling && proposed.virtual_mode_enabled {
            self.push_panning(env.hw, proposed.virtual_rect.size());
        } else if clear_panning {
            self.push_panning(env.hw, Size::default());
        }

        if enabling {
            let resized = mode.id() != self.current_mode
                || proposed.virtual_rect != self.current.virtual_rect
                || proposed.virtual_mode_enabled != self.current.virtual_mode_enabled;
            self.push_gamma(env.hw, &proposed.gamma, resized);
        }

        self.current = proposed;
        self.current.refresh_rate = mode.refresh_rate();
        if !enabling {
            self.current.rect = Rect::default();
        }
        if clear_panning {
            self.current.virtual_rect = Rect::default();
        }
        self.current_mode = mode.id();
        self.current_outputs = self.connected_outputs.clone();
        self.proposed = self.current.clone();

        log::info!("Changes for CRTC {} successfully applied", self.id);
        Ok(Changes::MODE)
    }

    fn push_panning(&self, hw: &mut HwContext<'_>, size: Size) {
        let panning = Panning {
            rect: Rect::from_parts(Point::default(), size),
            track: Rect::default(),
            border: [0; 4],
        };
        match hw.backend.set_panning(self.id, &panning, hw.timestamp.get()) {
            Ok(reply) if reply.status == SetConfigStatus::Success => {
                hw.timestamp.advance(reply.timestamp);
                log::debug!("CRTC {}: panning changed to {}", self.id, size);
            }
            Ok(reply) => log::warn!("CRTC {}: panning not changed ({:?})", self.id, reply.status),
            Err(e) => log::warn!("CRTC {}: panning not changed: {}", self.id, e),
        }
    }

    fn push_gamma(&self, hw: &mut HwContext<'_>, info: &GammaInfo, settle: bool) {
        let size = match hw.backend.gamma_size(self.id) {
            Ok(0) => return,
            Ok(size) => size,
            Err(e) => {
                log::warn!("CRTC {}: gamma size unavailable: {}", self.id, e);
                return;
            }
        };
        let ramp = gamma::encode(info, size);

        if settle && !hw.gamma.settle_delay.is_zero() {
            std::thread::sleep(hw.gamma.settle_delay);
        }
        for _ in 0..hw.gamma.pushes.max(1) {
            if let Err(e) = hw.backend.set_gamma(self.id, &ramp) {
                log::warn!("CRTC {}: setting gamma failed: {}", self.id, e);
                break;
            }
        }
        log::debug!("CRTC {}: brightness {:.2}", self.id, info.brightness);
    }
}

fn rate_matches(mode_rate: f64, requested: f64) -> bool {
    (mode_rate - requested).abs() < 0.01
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::randr::backend::GammaRamp;
    use crate::randr::testing::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mode_intersection() {
        let mut display = display(FakeBackend::dual_head());
        let screen = display.screen_mut(0).unwrap();
        let outputs = screen.outputs_map().clone();
        let crtc = screen.crtc_mut(CRTC_A).unwrap();

        assert_eq!(crtc.modes(&outputs), vec![MODE_1080, MODE_720]);

        assert!(crtc.remove_output(DP));
        assert_eq!(crtc.modes(&outputs), vec![MODE_1080, MODE_720, MODE_768]);

        assert!(crtc.remove_output(HDMI));
        assert!(crtc.modes(&outputs).is_empty());
        assert!(!crtc.remove_output(HDMI));
    }

    #[test]
    fn test_add_output_requires_possible() {
        let mut display = display(FakeBackend::dual_head());
        let crtc = display.screen_mut(0).unwrap().crtc_mut(CRTC_B).unwrap();
        assert!(!crtc.add_output(0x99, None));
        assert!(crtc.add_output(VGA, Some(Size::new(1024, 768))));
        assert_eq!(crtc.connected_outputs(), &[VGA]);
        assert_eq!(crtc.proposed().rect.size(), Size::new(1024, 768));
        assert!(crtc.proposed_changed());
    }

    #[test]
    fn test_propose_rotation_checks_support() {
        let mut display = display(FakeBackend::dual_head());
        let crtc = display.screen_mut(0).unwrap().crtc_mut(CRTC_B).unwrap();
        assert!(!crtc.propose_rotation(Rotation::ROTATE_90));
        assert!(crtc.propose_rotation(Rotation::ROTATE_180));
        assert_eq!(crtc.proposed().rotation, Rotation::ROTATE_180);
    }

    #[test]
    fn test_load_reads_hardware() {
        let mut display = display(FakeBackend::dual_head());
        let crtc = display.screen(0).unwrap().crtc(CRTC_A).unwrap();
        assert_eq!(crtc.rect(), Rect::new(0, 0, 1920, 1080));
        assert_eq!(crtc.current_mode(), MODE_1080);
        assert_relative_eq!(crtc.refresh_rate(), 60.0);
        assert_eq!(crtc.brightness(), 1.0);
        assert!(crtc.tracking());
        assert!(!crtc.virtual_mode_enabled());
        assert!(!crtc.proposed_changed());
        assert!(!display.screen_mut(0).unwrap().crtc(CRTC_B).unwrap().is_enabled());
    }

    #[test]
    fn test_end_to_end_mode_switch() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        let crtc = screen.crtc_mut(CRTC_A).unwrap();
        crtc.propose_size(Size::new(1280, 720));
        crtc.propose_refresh_rate(60.0);

        assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());

        let crtc = screen.crtc(CRTC_A).unwrap();
        assert_eq!(crtc.rect().size(), Size::new(1280, 720));
        assert_eq!(crtc.current_mode(), MODE_720);
        assert!(!crtc.proposed_changed());

        let configs = display.backend().crtc_configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].1.mode, MODE_720);
        assert_eq!(configs[0].1.outputs, vec![HDMI, DP]);
    }

    #[test]
    fn test_rate_selection_falls_back_to_first_size_match() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        let crtc = screen.crtc_mut(CRTC_A).unwrap();
        crtc.propose_size(Size::new(1280, 720));
        crtc.propose_refresh_rate(75.0);
        assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());
        assert_eq!(screen.crtc(CRTC_A).unwrap().current_mode(), MODE_720);
    }

    #[test]
    fn test_unavailable_mode_touches_nothing() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        // 1024x768 is only offered by HDMI-1.
        screen.crtc_mut(CRTC_A).unwrap().propose_size(Size::new(1024, 768));

        let result = screen.apply_crtc(&mut hw, CRTC_A);
        assert!(matches!(result, Err(ApplyError::ModeUnavailable { .. })));
        assert_eq!(screen.crtc(CRTC_A).unwrap().rect().size(), Size::new(1920, 1080));
        assert!(display.backend().crtc_configs().is_empty());
    }

    #[test]
    fn test_no_outputs_disables() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        let crtc = screen.crtc_mut(CRTC_A).unwrap();
        crtc.remove_output(HDMI);
        crtc.remove_output(DP);

        assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());
        assert!(!screen.crtc(CRTC_A).unwrap().is_enabled());

        let configs = display.backend().crtc_configs();
        assert_eq!(configs[0].1.mode, NONE);
        assert!(configs[0].1.outputs.is_empty());
        // Nothing is pushed to a CRTC being turned off.
        assert!(!display
            .backend()
            .calls
            .iter()
            .any(|c| matches!(c, Call::SetGamma(..) | Call::SetTransform(..))));
    }

    #[test]
    fn test_equivalent_rotation_needs_no_resize() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        screen.crtc_mut(CRTC_A).unwrap().propose_rotation(Rotation::ROTATE_180);

        assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());
        assert!(display.backend().screen_sizes().is_empty());
        assert_eq!(display.backend().crtcs[&CRTC_A].rect, Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn test_quarter_turn_grows_screen() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        screen.crtc_mut(CRTC_A).unwrap().propose_rotation(Rotation::ROTATE_90);

        assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());
        let crtc = screen.crtc(CRTC_A).unwrap();
        assert_eq!(crtc.rect().size(), Size::new(1920, 1080));
        assert_eq!(crtc.footprint().size(), Size::new(1080, 1920));

        // Grown to hold both orientations, then fitted to the new footprint.
        let sizes = display.backend().screen_sizes();
        assert_eq!(sizes[0], Size::new(1920, 1920));
        assert_eq!(sizes.last(), Some(&Size::new(1080, 1920)));
        assert_eq!(display.backend().crtcs[&CRTC_A].rect, Rect::new(0, 0, 1080, 1920));
    }

    #[test]
    fn test_quarter_turn_beyond_max_fails() {
        let mut backend = FakeBackend::dual_head();
        backend.size_range.max = Size::new(1920, 1200);
        let mut display = display(backend);
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        screen.crtc_mut(CRTC_A).unwrap().propose_rotation(Rotation::ROTATE_270);

        let result = screen.apply_crtc(&mut hw, CRTC_A);
        assert!(matches!(result, Err(ApplyError::BoundsExceeded { .. })));
        assert!(display.backend().crtc_configs().is_empty());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        screen.crtc_mut(CRTC_A).unwrap().propose_position(Point::new(0, 0));
        screen.crtc_mut(CRTC_A).unwrap().propose_brightness(0.6);

        assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());
        let after_first = screen.crtc(CRTC_A).unwrap().current().clone();
        assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());
        assert_eq!(screen.crtc(CRTC_A).unwrap().current(), &after_first);
        assert_eq!(display.backend().crtc_configs().len(), 1);
    }

    #[test]
    fn test_gamma_pushed_twice() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        screen.crtc_mut(CRTC_A).unwrap().propose_brightness(0.5);
        assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());

        let pushes: Vec<&GammaRamp> = display
            .backend()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::SetGamma(CRTC_A, ramp) => Some(ramp),
                _ => None,
            })
            .collect();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0], pushes[1]);
        assert_eq!(*pushes[0], gamma::encode(&GammaInfo::with_brightness(0.5), 256));
    }

    #[test]
    fn test_virtual_mode_sets_panning_and_scale() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        let crtc = screen.crtc_mut(CRTC_A).unwrap();
        crtc.propose_virtual_size(Size::new(2560, 1440));
        crtc.propose_virtual_mode_enabled(true);
        crtc.propose_tracking(false);

        assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());

        let backend = display.backend();
        assert_eq!(backend.screen_sizes(), vec![Size::new(2560, 1440)]);
        let transform = backend.transforms[&CRTC_A];
        assert_relative_eq!(transform.matrix[0][0], 2560.0 / 1920.0);
        assert_relative_eq!(transform.matrix[1][1], 1440.0 / 1080.0);
        assert_eq!(backend.pannings[&CRTC_A].rect, Rect::new(0, 0, 2560, 1440));
    }

    #[test]
    fn test_virtual_size_beyond_max() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        let crtc = screen.crtc_mut(CRTC_A).unwrap();
        crtc.propose_virtual_size(Size::new(9000, 1440));
        crtc.propose_virtual_mode_enabled(true);

        let result = screen.apply_crtc(&mut hw, CRTC_A);
        assert!(matches!(result, Err(ApplyError::InsufficientVirtualSize { .. })));
    }

    #[test]
    fn test_leaving_virtual_mode_clears_panning() {
        let mut display = display(FakeBackend::dual_head());
        {
            let (screen, mut hw) = display.screen_with_hw(0).unwrap();
            let crtc = screen.crtc_mut(CRTC_A).unwrap();
            crtc.propose_virtual_size(Size::new(2560, 1440));
            crtc.propose_virtual_mode_enabled(true);
            assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());
        }
        {
            let (screen, mut hw) = display.screen_with_hw(0).unwrap();
            screen.crtc_mut(CRTC_A).unwrap().propose_virtual_mode_enabled(false);
            assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());
        }
        assert!(display.backend().pannings[&CRTC_A].rect.is_empty());

        assert!(display.refresh());
        let crtc = display.screen(0).unwrap().crtc(CRTC_A).unwrap();
        assert!(!crtc.virtual_mode_enabled());
        assert!(crtc.virtual_rect().is_empty());
        assert!(crtc.tracking());
        assert!(!crtc.proposed_changed());
    }

    #[test]
    fn test_revert_restores_panning() {
        let mut display = display(FakeBackend::dual_head());
        {
            let crtc = display.screen_mut(0).unwrap().crtc_mut(CRTC_A).unwrap();
            crtc.propose_virtual_size(Size::new(2560, 1440));
            crtc.propose_virtual_mode_enabled(true);
        }
        assert!(display.apply_proposed(true));
        assert_eq!(display.backend().pannings[&CRTC_A].rect, Rect::new(0, 0, 2560, 1440));

        assert!(display.revert());
        assert!(display.backend().pannings[&CRTC_A].rect.is_empty());

        assert!(display.refresh());
        let crtc = display.screen(0).unwrap().crtc(CRTC_A).unwrap();
        assert!(!crtc.virtual_mode_enabled());
        assert!(crtc.virtual_rect().is_empty());
        assert_eq!(crtc.rect(), Rect::new(0, 0, 1920, 1080));
        assert!(!crtc.proposed_changed());
    }

    #[test]
    fn test_revert_when_current_is_original() {
        let mut display = display(FakeBackend::dual_head());
        let crtc = display.screen_mut(0).unwrap().crtc_mut(CRTC_A).unwrap();
        crtc.set_original();
        crtc.propose_size(Size::new(1280, 720));
        crtc.propose_rotation(Rotation::ROTATE_90);
        crtc.propose_brightness(0.4);
        assert!(crtc.proposed_changed());

        crtc.propose_original();
        assert!(!crtc.proposed_changed());
    }

    #[test]
    fn test_revert_when_current_moved_on() {
        let mut display = display(FakeBackend::dual_head());
        let (screen, mut hw) = display.screen_with_hw(0).unwrap();
        screen.crtc_mut(CRTC_A).unwrap().set_original();

        let crtc = screen.crtc_mut(CRTC_A).unwrap();
        crtc.propose_size(Size::new(1280, 720));
        crtc.propose_refresh_rate(60.0);
        assert!(screen.apply_crtc(&mut hw, CRTC_A).is_ok());

        let crtc = screen.crtc_mut(CRTC_A).unwrap();
        crtc.propose_brightness(0.4);
        crtc.propose_original();

        // The proposal is now the checkpoint, which differs from current.
        assert!(crtc.proposed_changed());
        assert_eq!(crtc.proposed(), crtc.original());
        assert_eq!(crtc.proposed().rect.size(), Size::new(1920, 1080));
        assert_eq!(crtc.current().rect.size(), Size::new(1280, 720));
    }
}
