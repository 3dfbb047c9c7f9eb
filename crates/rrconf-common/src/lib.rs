pub mod geometry;
pub mod ipc;
pub mod logging;
pub mod paths;

pub use geometry::{Point, Rect, Size};
pub use logging::FileLogger;
pub use paths::{config_dir, data_dir, rrconf_config_dir, rrconf_data_dir, rrconf_log_dir, settings_path};
