//! The persisted layout store.
//!
//! ```toml
//! [Display]
//! ApplyOnStartup = true
//! SyncTrayApp = false
//! StartupCommands = "xrandr --output HDMI-1 --mode 1920x1080 ..."
//!
//! [Screen_0]
//! OutputsUnified = false
//! Primary = "HDMI-1"
//!
//! [Screen_0.HDMI-1]
//! Active = true
//! X = 0
//! Y = 0
//! Width = 1920
//! Height = 1080
//! Rotation = 0
//! RefreshRate = 60.0
//! Brightness = 1.0
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "settings I/O error: {}", e),
            SettingsError::Parse(e) => write!(f, "invalid settings file: {}", e),
            SettingsError::Serialize(e) => write!(f, "could not serialize settings: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io(e) => Some(e),
            SettingsError::Parse(e) => Some(e),
            SettingsError::Serialize(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DisplaySettings {
    pub apply_on_startup: bool,
    pub sync_tray_app: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub startup_commands: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OutputSettings {
    pub active: bool,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Degrees: 0, 90, 180 or 270.
    pub rotation: u16,
    pub refresh_rate: f64,
    pub brightness: f64,
    pub virtual_width: i32,
    pub virtual_height: i32,
    pub tracking: bool,
    pub virtual_mode_enabled: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            active: false,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            rotation: 0,
            refresh_rate: 0.0,
            brightness: 1.0,
            virtual_width: 0,
            virtual_height: 0,
            tracking: true,
            virtual_mode_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScreenSettings {
    #[serde(default)]
    pub outputs_unified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    /// Keyed by output name.
    #[serde(flatten)]
    pub outputs: BTreeMap<String, OutputSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "Display", default)]
    pub display: DisplaySettings,
    /// `Screen_N` tables.
    #[serde(flatten)]
    pub screens: BTreeMap<String, ScreenSettings>,
}

fn screen_key(index: usize) -> String {
    format!("Screen_{}", index)
}

impl Settings {
    pub fn default_path() -> PathBuf {
        rrconf_common::settings_path()
    }

    /// `Ok(None)` if there is no settings file yet.
    pub fn load(path: &Path) -> Result<Option<Settings>, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No settings at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let settings = toml::from_str(&content).map_err(SettingsError::Parse)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(Some(settings))
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(SettingsError::Serialize)?;
        std::fs::write(path, content)?;
        log::info!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn screen(&self, index: usize) -> Option<&ScreenSettings> {
        self.screens.get(&screen_key(index))
    }

    pub fn screen_mut(&mut self, index: usize) -> &mut ScreenSettings {
        self.screens.entry(screen_key(index)).or_default()
    }

    pub fn startup_commands(&self) -> Vec<String> {
        self.display
            .startup_commands
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn set_startup_commands(&mut self, commands: &[String]) {
        self.display.startup_commands = commands.join("\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Settings {
        let mut settings = Settings::default();
        settings.display.apply_on_startup = true;
        settings.set_startup_commands(&[
            "xrandr --output HDMI-1 --mode 1920x1080".to_string(),
            "xrandr --screen 1 --output VGA-1 --off".to_string(),
        ]);

        let screen = settings.screen_mut(0);
        screen.primary = Some("HDMI-1".to_string());
        screen.outputs.insert(
            "HDMI-1".to_string(),
            OutputSettings {
                active: true,
                width: 1920,
                height: 1080,
                refresh_rate: 60.0,
                brightness: 0.8,
                ..Default::default()
            },
        );
        screen.outputs.insert(
            "DP-1".to_string(),
            OutputSettings {
                active: true,
                x: 1920,
                width: 1280,
                height: 1024,
                rotation: 90,
                ..Default::default()
            },
        );
        settings
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Settings::load(&dir.path().join("settings.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let settings = sample();
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap().unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.startup_commands().len(), 2);
        assert_eq!(loaded.screen(0).unwrap().outputs["DP-1"].rotation, 90);
        assert!(loaded.screen(1).is_none());
    }

    #[test]
    fn test_parse_hand_written() {
        let content = r#"
[Display]
ApplyOnStartup = false

[Screen_0]
OutputsUnified = true

[Screen_0.HDMI-1]
Active = true
Width = 1280
Height = 720
RefreshRate = 60
"#;
        let settings: Settings = toml::from_str(content).unwrap();
        assert!(!settings.display.apply_on_startup);
        assert!(settings.startup_commands().is_empty());

        let screen = settings.screen(0).unwrap();
        assert!(screen.outputs_unified);
        assert_eq!(screen.primary, None);
        let hdmi = &screen.outputs["HDMI-1"];
        assert_eq!((hdmi.width, hdmi.height), (1280, 720));
        assert_eq!(hdmi.brightness, 1.0);
        assert!(hdmi.tracking);
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[Display\nApplyOnStartup = ").unwrap();
        assert!(matches!(Settings::load(&path), Err(SettingsError::Parse(_))));
    }
}
