use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcEvent {
    #[serde(rename = "state")]
    State { screens: Vec<ScreenInfo> },
    #[serde(rename = "changed")]
    Changed { screens: Vec<ScreenInfo> },
    #[serde(rename = "confirm_countdown")]
    ConfirmCountdown { remaining: u32 },
    #[serde(rename = "applied")]
    Applied { success: bool },
    #[serde(rename = "reverted")]
    Reverted,
    #[serde(rename = "notice")]
    Notice { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcCommand {
    #[serde(rename = "get_state")]
    GetState,
    #[serde(rename = "configure")]
    Configure { screen: usize, output: OutputRequest },
    #[serde(rename = "set_primary")]
    SetPrimary { screen: usize, output: String },
    #[serde(rename = "set_unified")]
    SetUnified { screen: usize, unified: bool },
    #[serde(rename = "apply")]
    Apply {
        #[serde(default = "default_true")]
        confirm: bool,
    },
    #[serde(rename = "confirm")]
    Confirm,
    #[serde(rename = "revert")]
    Revert,
    #[serde(rename = "save")]
    Save {
        #[serde(default)]
        apply_on_startup: bool,
    },
    #[serde(rename = "reload")]
    Reload,
}

fn default_true() -> bool {
    true
}

/// A partial edit of one output; unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputRequest {
    pub name: String,
    pub active: Option<bool>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub rotation: Option<u16>,
    pub refresh_rate: Option<f64>,
    pub brightness: Option<f64>,
    pub virtual_width: Option<i32>,
    pub virtual_height: Option<i32>,
    pub tracking: Option<bool>,
    pub virtual_mode_enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeInfo {
    pub width: i32,
    pub height: i32,
    pub refresh_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputInfo {
    pub name: String,
    pub connected: bool,
    pub active: bool,
    pub primary: bool,
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
    pub modes: Vec<ModeInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub index: usize,
    pub width: i32,
    pub height: i32,
    pub min_width: i32,
    pub min_height: i32,
    pub max_width: i32,
    pub max_height: i32,
    pub unified: bool,
    pub outputs: Vec<OutputInfo>,
}

pub fn ipc_socket_path() -> std::path::PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        std::path::PathBuf::from(runtime_dir).join("rrconf.sock")
    } else {
        std::path::PathBuf::from("/tmp").join(format!("rrconf-{}.sock", unsafe { libc::getuid() }))
    }
}
