//! RandR display-state model.
//!
//! A [`Display`](display::Display) owns one [`Screen`](screen::Screen) per X
//! screen. Screens own their CRTCs, outputs and modes in id-keyed tables; all
//! cross references between them are plain ids. Every hardware call goes
//! through the [`RandrBackend`](backend::RandrBackend) boundary carried by a
//! [`HwContext`].

pub mod backend;
pub mod crtc;
pub mod display;
pub mod error;
pub mod gamma;
pub mod mode;
pub mod output;
pub mod screen;
#[cfg(test)]
pub mod testing;
pub mod x11;

use bitflags::bitflags;

use self::backend::RandrBackend;
use self::gamma::GammaTuning;

pub type CrtcId = u32;
pub type OutputId = u32;
pub type ModeId = u32;
pub type WindowId = u32;

/// The X11 `None` resource id.
pub const NONE: u32 = 0;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Rotation: u16 {
        const ROTATE_0 = 1;
        const ROTATE_90 = 2;
        const ROTATE_180 = 4;
        const ROTATE_270 = 8;
        const REFLECT_X = 16;
        const REFLECT_Y = 32;
    }
}

impl Rotation {
    const ANGLES: Rotation = Rotation::ROTATE_0
        .union(Rotation::ROTATE_90)
        .union(Rotation::ROTATE_180)
        .union(Rotation::ROTATE_270);

    /// The rotation bit without reflections.
    pub fn angle(self) -> Rotation {
        self.intersection(Self::ANGLES)
    }

    /// True for 90 and 270 degrees, where the footprint on the screen has
    /// width and height exchanged.
    pub fn swaps_axes(self) -> bool {
        self.intersects(Rotation::ROTATE_90 | Rotation::ROTATE_270)
    }

    /// 0<->180 and 90<->270 keep the footprint dimensions.
    pub fn is_equivalent(self, other: Rotation) -> bool {
        self.swaps_axes() == other.swaps_axes()
    }

    pub fn degrees(self) -> u16 {
        let angle = self.angle();
        if angle.contains(Rotation::ROTATE_90) {
            90
        } else if angle.contains(Rotation::ROTATE_180) {
            180
        } else if angle.contains(Rotation::ROTATE_270) {
            270
        } else {
            0
        }
    }

    pub fn from_degrees(degrees: u16) -> Option<Rotation> {
        match degrees % 360 {
            0 => Some(Rotation::ROTATE_0),
            90 => Some(Rotation::ROTATE_90),
            180 => Some(Rotation::ROTATE_180),
            270 => Some(Rotation::ROTATE_270),
            _ => None,
        }
    }

    /// Human-readable name of a single rotation or reflection bit.
    pub fn name(self) -> &'static str {
        if self == Rotation::ROTATE_0 {
            "No Rotation"
        } else if self == Rotation::ROTATE_90 {
            "Left (90 degrees)"
        } else if self == Rotation::ROTATE_180 {
            "Upside-Down (180 degrees)"
        } else if self == Rotation::ROTATE_270 {
            "Right (270 degrees)"
        } else if self == Rotation::REFLECT_X {
            "Mirror Horizontally"
        } else if self == Rotation::REFLECT_Y {
            "Mirror Vertically"
        } else {
            "Unknown Orientation"
        }
    }

    /// Argument for `xrandr --rotate`.
    pub fn xrandr_name(self) -> &'static str {
        match self.degrees() {
            90 => "left",
            180 => "inverted",
            270 => "right",
            _ => "normal",
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Changes: u32 {
        const OUTPUTS = 1 << 0;
        const MODE = 1 << 1;
        const ROTATION = 1 << 2;
        const CONNECTION = 1 << 3;
        const RECT = 1 << 4;
        const RATE = 1 << 5;
        const BRIGHTNESS = 1 << 6;
        const VIRTUAL_RECT = 1 << 7;
        const CRTC = 1 << 8;
        const PRIMARY = 1 << 9;
    }
}

/// Latest server configuration timestamp seen by this process. Never moves
/// backwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timestamp(u32);

impl Timestamp {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Returns true if the value moved.
    pub fn advance(&mut self, value: u32) -> bool {
        if value > self.0 {
            self.0 = value;
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn has_1_2(&self) -> bool {
        *self >= ProtocolVersion::new(1, 2)
    }

    pub fn has_1_3(&self) -> bool {
        *self >= ProtocolVersion::new(1, 3)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Everything a hardware-touching operation needs, borrowed from the
/// [`Display`](display::Display) for the duration of one call.
pub struct HwContext<'a> {
    pub backend: &'a mut dyn RandrBackend,
    pub timestamp: &'a mut Timestamp,
    pub version: ProtocolVersion,
    pub gamma: GammaTuning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_equivalence() {
        assert!(Rotation::ROTATE_0.is_equivalent(Rotation::ROTATE_180));
        assert!(Rotation::ROTATE_90.is_equivalent(Rotation::ROTATE_270));
        assert!(!Rotation::ROTATE_0.is_equivalent(Rotation::ROTATE_90));
        assert!(!Rotation::ROTATE_270.is_equivalent(Rotation::ROTATE_180));
        assert!((Rotation::ROTATE_90 | Rotation::REFLECT_X).swaps_axes());
    }

    #[test]
    fn test_rotation_degrees() {
        for degrees in [0, 90, 180, 270] {
            let rotation = Rotation::from_degrees(degrees).unwrap();
            assert_eq!(rotation.degrees(), degrees);
        }
        assert_eq!(Rotation::from_degrees(45), None);
        assert_eq!((Rotation::ROTATE_180 | Rotation::REFLECT_Y).degrees(), 180);
        assert_eq!(Rotation::ROTATE_90.xrandr_name(), "left");
        assert_eq!(Rotation::REFLECT_X.name(), "Mirror Horizontally");
    }

    #[test]
    fn test_timestamp_never_decrements() {
        let mut ts = Timestamp::new(100);
        assert!(ts.advance(150));
        assert!(!ts.advance(120));
        assert_eq!(ts.get(), 150);
    }

    #[test]
    fn test_protocol_version() {
        assert!(!ProtocolVersion::new(1, 1).has_1_2());
        assert!(ProtocolVersion::new(1, 2).has_1_2());
        assert!(!ProtocolVersion::new(1, 2).has_1_3());
        assert!(ProtocolVersion::new(1, 6).has_1_3());
        assert!(ProtocolVersion::new(2, 0).has_1_3());
    }
}
