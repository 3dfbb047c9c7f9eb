use rrconf_common::Size;

use super::backend::ModeTimings;
use super::{ModeId, NONE};

/// A display timing. Immutable once read from the server.
#[derive(Clone, Debug, PartialEq)]
pub struct Mode {
    id: ModeId,
    name: String,
    size: Size,
    refresh_rate: f64,
}

impl Mode {
    pub fn new(id: ModeId, name: impl Into<String>, size: Size, refresh_rate: f64) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            refresh_rate,
        }
    }

    /// The sentinel returned for unknown ids.
    pub fn null() -> Self {
        Self::new(NONE, "", Size::default(), 0.0)
    }

    pub fn from_timings(timings: &ModeTimings) -> Self {
        let mut vtotal = timings.vtotal as f64;
        if timings.double_scan {
            vtotal *= 2.0;
        }
        if timings.interlace {
            vtotal /= 2.0;
        }
        let pixels = timings.htotal as f64 * vtotal;
        let refresh_rate = if pixels > 0.0 {
            timings.dot_clock as f64 / pixels
        } else {
            0.0
        };

        Self::new(
            timings.id,
            timings.name.clone(),
            Size::new(timings.width as i32, timings.height as i32),
            refresh_rate,
        )
    }

    pub fn is_valid(&self) -> bool {
        self.id != NONE
    }

    pub fn id(&self) -> ModeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn refresh_rate(&self) -> f64 {
        self.refresh_rate
    }
}
