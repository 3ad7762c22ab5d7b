use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Capability bitmask of a sound card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const DISABLED: Self = Self(0);
    pub const CAPTURE: Self = Self(1);
    pub const PLAYBACK: Self = Self(2);
    pub const DUPLEX: Self = Self(1 | 2);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::DUPLEX.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn supports(&self, direction: Direction) -> bool {
        self.contains(direction.capability())
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::CAPTURE), self.contains(Self::PLAYBACK)) {
            (true, true) => f.write_str("capture+playback"),
            (true, false) => f.write_str("capture"),
            (false, true) => f.write_str("playback"),
            (false, false) => f.write_str("disabled"),
        }
    }
}

/// Data direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Capture,
    Playback,
}

impl Direction {
    pub fn capability(&self) -> Capabilities {
        match self {
            Self::Capture => Capabilities::CAPTURE,
            Self::Playback => Capabilities::PLAYBACK,
        }
    }
}

/// Logical mixer element a level or mute applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixerElement {
    Master,
    Playback,
    Capture,
}

impl MixerElement {
    pub const ALL: [MixerElement; 3] = [Self::Master, Self::Playback, Self::Capture];

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Master => 0,
            Self::Playback => 1,
            Self::Capture => 2,
        }
    }
}

/// Capture input selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    #[default]
    Mic,
    Line,
}

/// Enumeration entry handed to the call/media layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInfo {
    pub id: String,
    pub name: String,
    pub driver_type: String,
    pub capabilities: Capabilities,
}

/// Builds the registry id of a card: `"<driver_type>: <name>"`.
pub fn card_id(driver_type: &str, name: &str) -> String {
    format!("{}: {}", driver_type, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_bits() {
        let duplex = Capabilities::CAPTURE | Capabilities::PLAYBACK;
        assert_eq!(duplex, Capabilities::DUPLEX);
        assert!(duplex.supports(Direction::Capture));
        assert!(duplex.supports(Direction::Playback));
        assert!(!Capabilities::CAPTURE.supports(Direction::Playback));
        assert!(Capabilities::DISABLED.is_empty());
        assert_eq!(Capabilities::from_bits(0xff), Capabilities::DUPLEX);
    }

    #[test]
    fn capability_display() {
        assert_eq!(Capabilities::DUPLEX.to_string(), "capture+playback");
        assert_eq!(Capabilities::PLAYBACK.to_string(), "playback");
        assert_eq!(Capabilities::DISABLED.to_string(), "disabled");
    }

    #[test]
    fn id_format() {
        assert_eq!(card_id("ALSA", "default"), "ALSA: default");
    }
}
