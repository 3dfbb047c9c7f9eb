use std::collections::HashMap;
use std::path::PathBuf;

use rrconf_common::ipc::{IpcCommand, IpcEvent, OutputRequest, ScreenInfo};

use crate::config::Config;
use crate::ipc::screen_info;
use crate::output_config::{self, OutputConfig};
use crate::randr::backend::RandrBackend;
use crate::randr::display::Display;
use crate::session::{ConfirmCountdown, CountdownState};
use crate::settings::Settings;

/// Interactive session: the display, the edits staged by clients and the
/// confirmation countdown of the last apply.
pub struct State<B: RandrBackend> {
    pub display: Display<B>,
    config: Config,
    settings_path: PathBuf,
    countdown: ConfirmCountdown,
    /// Edits per (screen, output name) not yet applied.
    staged: HashMap<(usize, String), OutputConfig>,
}

impl<B: RandrBackend> State<B> {
    pub fn new(display: Display<B>, config: Config, settings_path: PathBuf) -> Self {
        Self {
            display,
            config,
            settings_path,
            countdown: ConfirmCountdown::new(),
            staged: HashMap::new(),
        }
    }

    pub fn screens(&self) -> Vec<ScreenInfo> {
        self.display.screens().iter().map(screen_info).collect()
    }

    pub fn countdown(&self) -> &ConfirmCountdown {
        &self.countdown
    }

    pub fn handle_command(&mut self, command: IpcCommand) -> Vec<IpcEvent> {
        log::debug!("[ipc] {:?}", command);
        match command {
            IpcCommand::GetState => vec![IpcEvent::State {
                screens: self.screens(),
            }],
            IpcCommand::Configure { screen, output } => self.configure(screen, &output),
            IpcCommand::SetPrimary { screen, output } => {
                let id = self
                    .display
                    .screen(screen)
                    .and_then(|s| s.output_by_name(&output))
                    .map(|o| o.id());
                let proposed = match (id, self.display.screen_mut(screen)) {
                    (Some(id), Some(s)) => s.propose_primary_output(id),
                    _ => false,
                };
                if proposed {
                    Vec::new()
                } else {
                    notice(format!("Unknown output {} on screen {}", output, screen))
                }
            }
            IpcCommand::SetUnified { screen, unified } => {
                let Some(s) = self.display.screen_mut(screen) else {
                    return notice(format!("Unknown screen {}", screen));
                };
                s.set_outputs_unified(unified);
                self.restage(screen);
                Vec::new()
            }
            IpcCommand::Apply { confirm } => self.apply(confirm),
            IpcCommand::Confirm => {
                if self.countdown.confirm() {
                    self.display.set_original();
                }
                Vec::new()
            }
            IpcCommand::Revert => self.revert(),
            IpcCommand::Save { apply_on_startup } => self.save(apply_on_startup),
            IpcCommand::Reload => {
                self.staged.clear();
                self.display.refresh();
                vec![IpcEvent::State {
                    screens: self.screens(),
                }]
            }
        }
    }

    fn configure(&mut self, screen: usize, request: &OutputRequest) -> Vec<IpcEvent> {
        let key = (screen, request.name.clone());
        let config = match self.staged.get(&key) {
            Some(config) => Some(config.clone()),
            None => self.display.screen(screen).and_then(|s| {
                let id = s.output_by_name(&request.name)?.id();
                OutputConfig::from_output(s, id)
            }),
        };
        let Some(mut config) = config else {
            return notice(format!("Unknown output {} on screen {}", request.name, screen));
        };

        let mut events = Vec::new();
        if !config.merge(request) {
            events.extend(notice(format!("Some settings for {} were rejected", request.name)));
        }
        self.staged.insert(key, config);
        self.restage(screen);
        events
    }

    /// Rebuilds the screen's proposals from its outputs plus staged edits.
    fn restage(&mut self, index: usize) {
        let Some(screen) = self.display.screen_mut(index) else {
            return;
        };
        let configs: Vec<OutputConfig> = screen
            .outputs()
            .filter(|output| output.is_connected())
            .filter_map(|output| match self.staged.get(&(index, output.name().to_string())) {
                Some(config) => Some(config.clone()),
                None => OutputConfig::from_output(screen, output.id()),
            })
            .collect();
        let staged = output_config::apply_configs(screen, &configs);
        log::debug!("Screen {}: {} outputs staged", index, staged);
    }

    fn apply(&mut self, confirm: bool) -> Vec<IpcEvent> {
        let timeout = if confirm { self.config.confirm_timeout() } else { None };
        let success = self.display.apply_proposed(timeout.is_some());
        self.staged.clear();

        let mut events = vec![IpcEvent::Applied { success }];
        events.extend(self.notices());
        match timeout {
            Some(secs) if success => {
                self.countdown.start(secs);
                events.push(IpcEvent::ConfirmCountdown { remaining: secs });
            }
            _ if success => self.display.set_original(),
            _ => {}
        }
        events
    }

    fn revert(&mut self) -> Vec<IpcEvent> {
        self.countdown.cancel();
        self.staged.clear();
        if !self.display.revert() {
            log::warn!("Reverting did not fully succeed");
        }
        let mut events = vec![IpcEvent::Reverted];
        events.extend(self.notices());
        events
    }

    fn save(&mut self, apply_on_startup: bool) -> Vec<IpcEvent> {
        let mut settings = match Settings::load(&self.settings_path) {
            Ok(settings) => settings.unwrap_or_default(),
            Err(e) => {
                log::warn!("Replacing unreadable settings: {}", e);
                Settings::default()
            }
        };

        let sync_tray_app = settings.display.sync_tray_app;
        self.display.save_display(&mut settings, sync_tray_app);
        if apply_on_startup {
            self.display.save_startup(&mut settings);
        } else {
            self.display.disable_startup(&mut settings);
        }

        match settings.save(&self.settings_path) {
            Ok(()) => Vec::new(),
            Err(e) => {
                log::error!("Saving settings failed: {}", e);
                notice(format!("Could not save settings: {}", e))
            }
        }
    }

    /// One-second tick of the confirmation countdown.
    pub fn tick(&mut self) -> Vec<IpcEvent> {
        match self.countdown.tick() {
            CountdownState::Idle => Vec::new(),
            CountdownState::Running { remaining } => vec![IpcEvent::ConfirmCountdown { remaining }],
            CountdownState::Expired => self.revert(),
        }
    }

    /// Handles pending RandR notifications.
    pub fn dispatch_display_events(&mut self) -> Vec<IpcEvent> {
        self.display.dispatch_events();
        let mut events = Vec::new();
        if !self.display.take_changes().is_empty() {
            events.push(IpcEvent::Changed {
                screens: self.screens(),
            });
        }
        events.extend(self.notices());
        events
    }

    fn notices(&mut self) -> Vec<IpcEvent> {
        self.display
            .take_notices()
            .into_iter()
            .map(|message| IpcEvent::Notice { message })
            .collect()
    }
}

fn notice(message: String) -> Vec<IpcEvent> {
    log::warn!("{}", message);
    vec![IpcEvent::Notice { message }]
}
