//! Per-output staging of user edits before they are pushed into CRTC
//! proposals.

use rrconf_common::ipc::OutputRequest;
use rrconf_common::{Point, Size};

use crate::randr::screen::Screen;
use crate::randr::{OutputId, Rotation};
use crate::settings::{OutputSettings, ScreenSettings};

const RATE_TOLERANCE: f64 = 0.01;
const BRIGHTNESS_TOLERANCE: f64 = 0.005;

/// What the user wants one output to look like.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputConfig {
    pub name: String,
    pub active: bool,
    pub position: Point,
    pub resolution: Size,
    pub rotation: Rotation,
    pub refresh_rate: f64,
    pub brightness: f64,
    pub virtual_size: Size,
    pub tracking: bool,
    pub virtual_mode_enabled: bool,
}

impl OutputConfig {
    /// Staging object holding the output's current state.
    pub fn from_output(screen: &Screen, id: OutputId) -> Option<Self> {
        let output = screen.output(id)?;
        let crtc = screen
            .crtc(output.current_crtc())
            .filter(|crtc| crtc.is_enabled());

        let config = match crtc {
            Some(crtc) => OutputConfig {
                name: output.name().to_string(),
                active: true,
                position: crtc.rect().origin(),
                resolution: crtc.rect().size(),
                rotation: crtc.rotation(),
                refresh_rate: crtc.refresh_rate(),
                brightness: crtc.brightness(),
                virtual_size: crtc.virtual_rect().size(),
                tracking: crtc.tracking(),
                virtual_mode_enabled: crtc.virtual_mode_enabled(),
            },
            None => OutputConfig {
                name: output.name().to_string(),
                active: false,
                position: Point::default(),
                resolution: Size::default(),
                rotation: Rotation::ROTATE_0,
                refresh_rate: 0.0,
                brightness: 1.0,
                virtual_size: Size::default(),
                tracking: true,
                virtual_mode_enabled: false,
            },
        };
        Some(config)
    }

    pub fn from_settings(name: &str, settings: &OutputSettings) -> Self {
        OutputConfig {
            name: name.to_string(),
            active: settings.active,
            position: Point::new(settings.x, settings.y),
            resolution: Size::new(settings.width, settings.height),
            rotation: Rotation::from_degrees(settings.rotation).unwrap_or(Rotation::ROTATE_0),
            refresh_rate: settings.refresh_rate,
            brightness: settings.brightness,
            virtual_size: Size::new(settings.virtual_width, settings.virtual_height),
            tracking: settings.tracking,
            virtual_mode_enabled: settings.virtual_mode_enabled,
        }
    }

    pub fn to_settings(&self) -> OutputSettings {
        OutputSettings {
            active: self.active,
            x: self.position.x,
            y: self.position.y,
            width: self.resolution.width,
            height: self.resolution.height,
            rotation: self.rotation.degrees(),
            refresh_rate: self.refresh_rate,
            brightness: self.brightness,
            virtual_width: self.virtual_size.width,
            virtual_height: self.virtual_size.height,
            tracking: self.tracking,
            virtual_mode_enabled: self.virtual_mode_enabled,
        }
    }

    /// Folds a partial edit in. Returns false if a field was rejected.
    pub fn merge(&mut self, request: &OutputRequest) -> bool {
        let mut ok = true;
        if let Some(active) = request.active {
            self.active = active;
        }
        if let Some(x) = request.x {
            self.position.x = x;
        }
        if let Some(y) = request.y {
            self.position.y = y;
        }
        if let Some(width) = request.width {
            self.resolution.width = width;
        }
        if let Some(height) = request.height {
            self.resolution.height = height;
        }
        if let Some(degrees) = request.rotation {
            match Rotation::from_degrees(degrees) {
                Some(rotation) => self.rotation = rotation,
                None => {
                    log::warn!("{}: {} is not a valid rotation", self.name, degrees);
                    ok = false;
                }
            }
        }
        if let Some(rate) = request.refresh_rate {
            self.refresh_rate = rate;
        }
        if let Some(brightness) = request.brightness {
            self.brightness = brightness;
        }
        if let Some(width) = request.virtual_width {
            self.virtual_size.width = width;
        }
        if let Some(height) = request.virtual_height {
            self.virtual_size.height = height;
        }
        if let Some(tracking) = request.tracking {
            self.tracking = tracking;
        }
        if let Some(enabled) = request.virtual_mode_enabled {
            self.virtual_mode_enabled = enabled;
        }
        ok
    }

    /// Active with a usable resolution; anything else means "switch off".
    pub fn is_active(&self) -> bool {
        self.active && !self.resolution.is_empty()
    }

    /// True if applying this config after translating it by `offset` would
    /// change anything.
    pub fn has_pending_changes(&self, screen: &Screen, offset: Point) -> bool {
        let Some(current) = screen
            .output_by_name(&self.name)
            .and_then(|output| OutputConfig::from_output(screen, output.id()))
        else {
            return false;
        };

        if !self.is_active() {
            return current.active;
        }
        if !current.active {
            return true;
        }

        let position = Point::new(self.position.x + offset.x, self.position.y + offset.y);
        position != current.position
            || self.resolution != current.resolution
            || self.rotation != current.rotation
            || (self.refresh_rate != 0.0
                && (self.refresh_rate - current.refresh_rate).abs() >= RATE_TOLERANCE)
            || (self.brightness - current.brightness).abs() >= BRIGHTNESS_TOLERANCE
            || self.virtual_size != current.virtual_size
            || self.tracking != current.tracking
            || self.virtual_mode_enabled != current.virtual_mode_enabled
    }
}

/// Largest resolution offered by every named output.
pub fn common_resolution(screen: &Screen, names: &[&str]) -> Option<Size> {
    let mut sets = names.iter().map(|name| {
        screen
            .output_by_name(name)
            .map(|output| {
                output
                    .modes()
                    .iter()
                    .map(|&id| screen.mode(id).size())
                    .filter(|size| !size.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    });

    let mut common = sets.next()?;
    for sizes in sets {
        common.retain(|size| sizes.contains(size));
    }
    common.into_iter().max_by_key(|size| size.area())
}

/// Offset that moves the top-left-most active output to the origin.
fn normalization_offset(configs: &[OutputConfig]) -> Point {
    let min = configs
        .iter()
        .filter(|c| c.is_active())
        .map(|c| c.position)
        .reduce(|a, b| Point::new(a.x.min(b.x), a.y.min(b.y)))
        .unwrap_or_default();
    Point::new(-min.x, -min.y)
}

/// Stages a batch of configs into the screen's CRTC proposals. Nothing is
/// sent to the server. Returns the number of outputs staged.
pub fn apply_configs(screen: &mut Screen, configs: &[OutputConfig]) -> usize {
    let mut configs = configs.to_vec();

    if screen.outputs_unified() {
        let names: Vec<&str> = configs
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.name.as_str())
            .collect();
        match common_resolution(screen, &names) {
            Some(size) => {
                log::debug!("Unifying {} outputs at {}", names.len(), size);
                for config in configs.iter_mut().filter(|c| c.is_active()) {
                    config.position = Point::default();
                    config.resolution = size;
                }
            }
            None => log::warn!("Outputs share no resolution, leaving them separate"),
        }
    }

    let offset = normalization_offset(&configs);
    log::debug!("Normalizing positions by {}x{}", offset.x, offset.y);

    let mut staged = 0;
    for config in &configs {
        let Some(output) = screen.output_by_name(&config.name) else {
            log::warn!("Unknown output {}", config.name);
            continue;
        };
        let id = output.id();
        if !output.is_connected() {
            continue;
        }

        if !config.is_active() {
            log::debug!("Disabling {}", config.name);
            screen.disable_output(id);
            staged += 1;
            continue;
        }

        if !config.has_pending_changes(screen, offset) {
            log::debug!("Ignoring identical config for {}", config.name);
            continue;
        }

        // Free the old CRTC first so two outputs never claim the same one.
        screen.disconnect_output(id);
        let Some(crtc_id) = screen.assign_crtc(id) else {
            log::warn!("No free CRTC for {}", config.name);
            continue;
        };

        let Some(crtc) = screen.crtc_mut(crtc_id) else {
            continue;
        };
        log::debug!(
            "Output config for {}: {}x{}+{}+{}, {}, {:.2} Hz, brightness {:.2}",
            config.name,
            config.resolution.width,
            config.resolution.height,
            config.position.x + offset.x,
            config.position.y + offset.y,
            config.rotation.name(),
            config.refresh_rate,
            config.brightness
        );
        crtc.propose_size(config.resolution);
        crtc.propose_position(Point::new(config.position.x + offset.x, config.position.y + offset.y));
        if !crtc.propose_rotation(config.rotation) {
            log::warn!("{}: {} not supported", config.name, config.rotation.name());
        }
        crtc.propose_refresh_rate(config.refresh_rate);
        crtc.propose_brightness(config.brightness);
        crtc.propose_virtual_size(config.virtual_size);
        crtc.propose_tracking(config.tracking);
        crtc.propose_virtual_mode_enabled(config.virtual_mode_enabled);
        staged += 1;
    }
    staged
}

/// The configs a settings table describes for this screen, plus its
/// primary and unified flags staged on the screen.
pub fn stage_settings(screen: &mut Screen, settings: &ScreenSettings) -> usize {
    screen.set_outputs_unified(settings.outputs_unified);

    let configs: Vec<OutputConfig> = settings
        .outputs
        .iter()
        .map(|(name, output)| OutputConfig::from_settings(name, output))
        .collect();
    let staged = apply_configs(screen, &configs);

    let primary = settings
        .primary
        .as_deref()
        .and_then(|name| screen.output_by_name(name))
        .map(|output| output.id());
    if let Some(primary) = primary {
        screen.propose_primary_output(primary);
    }
    staged
}

/// The screen's current layout as a settings table.
pub fn screen_settings(screen: &Screen) -> ScreenSettings {
    let outputs = screen
        .outputs()
        .filter(|output| output.is_connected())
        .filter_map(|output| OutputConfig::from_output(screen, output.id()))
        .map(|config| (config.name.clone(), config.to_settings()))
        .collect();

    let primary = screen
        .output(screen.primary_output())
        .map(|output| output.name().to_string());

    ScreenSettings {
        outputs_unified: screen.outputs_unified(),
        primary,
        outputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::randr::testing::*;

    fn config(screen: &Screen, id: OutputId) -> OutputConfig {
        OutputConfig::from_output(screen, id).unwrap()
    }

    #[test]
    fn test_current_state_has_no_pending_changes() {
        let display = display(FakeBackend::dual_head());
        let screen = display.screen(0).unwrap();
        let hdmi = config(screen, HDMI);
        assert!(hdmi.is_active());
        assert_eq!(hdmi.resolution, Size::new(1920, 1080));
        assert!(!hdmi.has_pending_changes(screen, Point::default()));
        assert!(hdmi.has_pending_changes(screen, Point::new(10, 0)));

        let vga = config(screen, VGA);
        assert!(!vga.is_active());
        assert!(!vga.has_pending_changes(screen, Point::default()));
    }

    #[test]
    fn test_merge_request() {
        let display = display(FakeBackend::dual_head());
        let mut hdmi = config(display.screen(0).unwrap(), HDMI);
        let request = OutputRequest {
            name: "HDMI-1".into(),
            width: Some(1280),
            height: Some(720),
            rotation: Some(45),
            ..Default::default()
        };
        assert!(!hdmi.merge(&request));
        assert_eq!(hdmi.resolution, Size::new(1280, 720));
        assert_eq!(hdmi.rotation, Rotation::ROTATE_0);
        assert_eq!(hdmi.position, Point::default());
    }

    #[test]
    fn test_positions_normalized() {
        let mut display = display(FakeBackend::dual_head());
        let screen = display.screen_mut(0).unwrap();

        let mut hdmi = config(screen, HDMI);
        hdmi.position = Point::new(-1280, 100);
        let mut dp = config(screen, DP);
        dp.position = Point::new(0, 0);
        dp.resolution = Size::new(1280, 720);

        assert_eq!(apply_configs(screen, &[hdmi, dp]), 2);

        let placed: Vec<_> = screen
            .crtcs()
            .filter(|crtc| !crtc.connected_outputs().is_empty())
            .map(|crtc| (crtc.connected_outputs().to_vec(), crtc.proposed().rect))
            .collect();
        assert_eq!(placed.len(), 2);
        assert!(placed.contains(&(vec![HDMI], rrconf_common::Rect::new(0, 100, 1920, 1080))));
        assert!(placed.contains(&(vec![DP], rrconf_common::Rect::new(1280, 0, 1280, 720))));
    }

    #[test]
    fn test_apply_end_to_end() {
        let mut display = display(FakeBackend::dual_head());
        let screen = display.screen_mut(0).unwrap();
        let hdmi = config(screen, HDMI);
        let mut dp = config(screen, DP);
        dp.position = Point::new(1920, 0);
        dp.resolution = Size::new(1280, 720);
        apply_configs(screen, &[hdmi, dp]);

        assert!(display.apply_proposed(false));
        let screen = display.screen(0).unwrap();
        assert_eq!(screen.rect(), rrconf_common::Rect::new(0, 0, 3200, 1080));
        assert_eq!(screen.output(DP).unwrap().rect(), rrconf_common::Rect::new(1920, 0, 1280, 720));
        assert_eq!(screen.output(HDMI).unwrap().rect().size(), Size::new(1920, 1080));
    }

    #[test]
    fn test_inactive_config_disables() {
        let mut display = display(FakeBackend::dual_head());
        let screen = display.screen_mut(0).unwrap();
        let mut dp = config(screen, DP);
        dp.active = false;
        assert_eq!(apply_configs(screen, &[dp]), 1);
        assert_eq!(screen.crtc(CRTC_A).unwrap().connected_outputs(), &[HDMI]);
        assert_eq!(screen.output(DP).unwrap().proposed_crtc(), crate::randr::NONE);
    }

    #[test]
    fn test_identical_config_skipped() {
        let mut display = display(FakeBackend::dual_head());
        let screen = display.screen_mut(0).unwrap();
        let hdmi = config(screen, HDMI);
        assert_eq!(apply_configs(screen, &[hdmi]), 0);
        assert!(!screen.proposed_changed());
    }

    #[test]
    fn test_unified_uses_largest_common_resolution() {
        let mut display = display(FakeBackend::dual_head());
        let screen = display.screen_mut(0).unwrap();
        assert_eq!(common_resolution(screen, &["HDMI-1", "DP-1"]), Some(Size::new(1920, 1080)));
        assert_eq!(common_resolution(screen, &["HDMI-1", "VGA-1"]), None);

        screen.set_outputs_unified(true);
        let mut hdmi = config(screen, HDMI);
        hdmi.resolution = Size::new(1024, 768);
        hdmi.position = Point::new(0, 0);
        let mut dp = config(screen, DP);
        dp.position = Point::new(1920, 0);
        apply_configs(screen, &[hdmi, dp]);

        for crtc in screen.crtcs().filter(|c| !c.connected_outputs().is_empty()) {
            assert_eq!(crtc.proposed().rect, rrconf_common::Rect::new(0, 0, 1920, 1080));
        }
    }

    #[test]
    fn test_settings_round_trip_through_screen() {
        let mut display = display(FakeBackend::dual_head());
        let screen = display.screen_mut(0).unwrap();
        let mut settings = screen_settings(screen);
        assert_eq!(settings.primary.as_deref(), Some("HDMI-1"));
        assert_eq!(settings.outputs.len(), 2);
        assert_eq!(settings.outputs["DP-1"].width, 1920);

        // Unchanged settings stage nothing.
        assert_eq!(stage_settings(screen, &settings), 0);

        settings.primary = Some("DP-1".to_string());
        if let Some(dp) = settings.outputs.get_mut("DP-1") {
            dp.brightness = 0.5;
        }
        assert_eq!(stage_settings(screen, &settings), 1);
        assert!(screen.proposed_changed());
        assert_eq!(screen.proposed_primary_output(), DP);
    }
}
