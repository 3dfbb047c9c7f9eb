use std::collections::HashMap;

use super::backend::{RandrBackend, RandrEvent};
use super::error::DisplayError;
use super::gamma::GammaTuning;
use super::screen::{ChangeNotice, Screen};
use super::{HwContext, ProtocolVersion, Timestamp, WindowId};
use crate::output_config;
use crate::settings::Settings;

/// The connection-wide RandR state: every screen plus the shared protocol
/// timestamp.
pub struct Display<B: RandrBackend> {
    backend: B,
    timestamp: Timestamp,
    version: ProtocolVersion,
    event_base: u8,
    error_base: u8,
    error: Option<DisplayError>,
    screens: Vec<Screen>,
    roots: HashMap<WindowId, usize>,
    current_screen: usize,
    gamma: GammaTuning,
}

impl<B: RandrBackend> Display<B> {
    pub fn new(backend: B) -> Self {
        Self::with_gamma_tuning(backend, GammaTuning::default())
    }

    pub fn with_gamma_tuning(backend: B, gamma: GammaTuning) -> Self {
        let mut display = Self {
            backend,
            timestamp: Timestamp::default(),
            version: ProtocolVersion::default(),
            event_base: 0,
            error_base: 0,
            error: None,
            screens: Vec::new(),
            roots: HashMap::new(),
            current_screen: 0,
            gamma,
        };

        if let Err(e) = display.open() {
            log::error!("RandR unavailable: {}", e);
            display.error = Some(e);
            display.screens.clear();
            display.roots.clear();
        }
        display
    }

    fn open(&mut self) -> Result<(), DisplayError> {
        let info = self.backend.extension()?.ok_or(DisplayError::ExtensionUnavailable)?;
        self.version = info.version;
        self.event_base = info.event_base;
        self.error_base = info.error_base;

        if !info.version.has_1_2() {
            return Err(DisplayError::VersionTooOld(info.version));
        }
        log::info!(
            "RandR {} (event base {}, error base {})",
            info.version,
            info.event_base,
            info.error_base
        );

        let roots = self.backend.screen_roots();
        for (index, root) in roots.into_iter().enumerate() {
            let mut hw = HwContext {
                backend: &mut self.backend,
                timestamp: &mut self.timestamp,
                version: self.version,
                gamma: self.gamma,
            };
            let screen = Screen::load(&mut hw, index, root)?;
            self.backend.select_input(root)?;
            self.roots.insert(root, index);
            self.screens.push(screen);
        }
        self.backend.flush()?;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&DisplayError> {
        self.error.as_ref()
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn event_base(&self) -> u8 {
        self.event_base
    }

    pub fn error_base(&self) -> u8 {
        self.error_base
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp.get()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn screens(&self) -> &[Screen] {
        &self.screens
    }

    pub fn screen(&self, index: usize) -> Option<&Screen> {
        self.screens.get(index)
    }

    pub fn screen_mut(&mut self, index: usize) -> Option<&mut Screen> {
        self.screens.get_mut(index)
    }

    pub fn current_screen(&self) -> usize {
        self.current_screen
    }

    pub fn set_current_screen(&mut self, index: usize) -> bool {
        if index >= self.screens.len() {
            return false;
        }
        self.current_screen = index;
        true
    }

    /// A screen together with a hardware context for operating on it.
    pub fn screen_with_hw(&mut self, index: usize) -> Option<(&mut Screen, HwContext<'_>)> {
        let screen = self.screens.get_mut(index)?;
        let hw = HwContext {
            backend: &mut self.backend,
            timestamp: &mut self.timestamp,
            version: self.version,
            gamma: self.gamma,
        };
        Some((screen, hw))
    }

    fn for_each_screen<F>(&mut self, mut f: F) -> bool
    where
        F: FnMut(&mut Screen, &mut HwContext<'_>) -> bool,
    {
        let mut hw = HwContext {
            backend: &mut self.backend,
            timestamp: &mut self.timestamp,
            version: self.version,
            gamma: self.gamma,
        };
        let mut success = true;
        for screen in &mut self.screens {
            success &= f(screen, &mut hw);
        }
        success
    }

    /// Applies every screen's pending changes. The confirmation countdown
    /// itself is driven by the caller; `confirm` only changes what is
    /// logged.
    pub fn apply_proposed(&mut self, confirm: bool) -> bool {
        if !self.is_valid() {
            return false;
        }
        log::info!("Applying proposed changes (confirm: {})", confirm);
        let success = self.for_each_screen(|screen, hw| screen.apply_proposed(hw));
        if let Err(e) = self.backend.flush() {
            log::warn!("Flushing the X connection failed: {}", e);
        }
        success
    }

    pub fn proposed_changed(&self) -> bool {
        self.screens.iter().any(Screen::proposed_changed)
    }

    /// Stages the session checkpoint everywhere and applies it.
    pub fn revert(&mut self) -> bool {
        if !self.is_valid() {
            return false;
        }
        log::info!("Reverting to the original configuration");
        for screen in &mut self.screens {
            screen.propose_original();
        }
        self.apply_proposed(false)
    }

    /// Makes the current configuration the one `revert` returns to.
    pub fn set_original(&mut self) {
        for screen in &mut self.screens {
            screen.set_original();
        }
    }

    pub fn can_handle(&self, event: &RandrEvent) -> bool {
        self.is_valid() && self.screen_for(event).is_some()
    }

    fn screen_for(&self, event: &RandrEvent) -> Option<usize> {
        if let RandrEvent::ScreenChange { root, .. } = event {
            if let Some(&index) = self.roots.get(root) {
                return Some(index);
            }
        }
        self.roots.get(&event.window()).copied()
    }

    /// Routes a notification to its screen. Returns false if no screen owns
    /// it.
    pub fn handle_event(&mut self, event: &RandrEvent) -> bool {
        if !self.is_valid() {
            return false;
        }
        let Some(index) = self.screen_for(event) else {
            return false;
        };
        let Some((screen, mut hw)) = self.screen_with_hw(index) else {
            return false;
        };
        if let Err(e) = screen.handle_event(&mut hw, event) {
            log::warn!("Screen {}: handling {:?} failed: {}", index, event, e);
        }
        true
    }

    /// Drains queued notifications from the backend and dispatches them.
    pub fn dispatch_events(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.backend.poll_event() {
                Ok(Some(event)) => {
                    if self.handle_event(&event) {
                        handled += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Reading X events failed: {}", e);
                    break;
                }
            }
        }
        handled
    }

    /// True if the server's configuration moved past what we have cached.
    pub fn needs_refresh(&mut self) -> bool {
        if !self.is_valid() {
            return false;
        }
        let cached = self.timestamp.get();
        let screens: Vec<(WindowId, u32)> = self
            .screens
            .iter()
            .map(|s| (s.root(), s.config_timestamp()))
            .collect();

        for (root, config_timestamp) in screens {
            match self.backend.config_times(root) {
                Ok(times) => {
                    if times.timestamp > cached || times.config_timestamp > config_timestamp {
                        log::debug!(
                            "Screen {:#x}: server at {}/{}, cached {}/{}",
                            root,
                            times.timestamp,
                            times.config_timestamp,
                            cached,
                            config_timestamp
                        );
                        return true;
                    }
                }
                Err(e) => log::warn!("Querying config times failed: {}", e),
            }
        }
        false
    }

    /// Reloads every screen from the server.
    pub fn refresh(&mut self) -> bool {
        if !self.is_valid() {
            return false;
        }
        self.for_each_screen(|screen, hw| match screen.load_settings(hw, true) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Screen {}: reload failed: {}", screen.index(), e);
                false
            }
        })
    }

    pub fn take_changes(&mut self) -> Vec<ChangeNotice> {
        self.screens.iter_mut().flat_map(Screen::take_notices).collect()
    }

    /// User-facing messages produced by the last apply.
    pub fn take_notices(&mut self) -> Vec<String> {
        self.screens.iter_mut().flat_map(Screen::take_messages).collect()
    }

    /// Stages every screen's stored layout. Returns the stored
    /// apply-on-startup flag.
    pub fn load_display(&mut self, settings: &Settings, load_screens: bool) -> bool {
        if load_screens && self.is_valid() {
            for screen in &mut self.screens {
                if let Some(stored) = settings.screen(screen.index()) {
                    let staged = output_config::stage_settings(screen, stored);
                    log::info!("Screen {}: staged {} outputs from settings", screen.index(), staged);
                }
            }
        }
        settings.display.apply_on_startup
    }

    pub fn save_display(&self, settings: &mut Settings, sync_tray_app: bool) {
        settings.display.sync_tray_app = sync_tray_app;
        for screen in &self.screens {
            *settings.screen_mut(screen.index()) = output_config::screen_settings(screen);
        }
    }

    /// Records the current layout as `xrandr` commands to run at login.
    pub fn save_startup(&self, settings: &mut Settings) {
        let commands: Vec<String> = self.screens.iter().flat_map(Screen::startup_commands).collect();
        settings.display.apply_on_startup = true;
        settings.set_startup_commands(&commands);
    }

    pub fn disable_startup(&self, settings: &mut Settings) {
        settings.display.apply_on_startup = false;
        settings.display.startup_commands.clear();
    }
}
