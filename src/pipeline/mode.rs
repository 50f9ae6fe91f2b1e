use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Transform applied to every frame
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    Original = 0,
    Grayscale = 1,
    EdgeDetect = 2,
}

impl ProcessingMode {
    pub const ALL: [ProcessingMode; 3] = [Self::Original, Self::Grayscale, Self::EdgeDetect];

    /// Values outside the defined set read as `Original`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Grayscale,
            2 => Self::EdgeDetect,
            _ => Self::Original,
        }
    }

    /// The mode after this one, wrapping around.
    pub fn next(self) -> Self {
        Self::from_u8((self as u8 + 1) % Self::ALL.len() as u8)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Original => "Original",
            Self::Grayscale => "Grayscale",
            Self::EdgeDetect => "Edge",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMode(pub String);

impl fmt::Display for UnknownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown processing mode `{}`", self.0)
    }
}

impl std::error::Error for UnknownMode {}

impl FromStr for ProcessingMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "original" | "o" => Ok(Self::Original),
            "1" | "grayscale" | "gray" | "g" => Ok(Self::Grayscale),
            "2" | "edge" | "edge_detect" | "canny" | "e" => Ok(Self::EdgeDetect),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Shared, lock-free handle to the active mode.
///
/// Writers never wait and readers see the latest store on their next load;
/// a frame already past its load keeps the mode it read.
#[derive(Debug, Clone, Default)]
pub struct ModeControl {
    slot: Arc<AtomicU8>,
}

impl ModeControl {
    pub fn new(mode: ProcessingMode) -> Self {
        Self {
            slot: Arc::new(AtomicU8::new(mode as u8)),
        }
    }

    pub fn set(&self, mode: ProcessingMode) {
        self.slot.store(mode as u8, Ordering::Release);
    }

    pub fn get(&self) -> ProcessingMode {
        ProcessingMode::from_u8(self.slot.load(Ordering::Acquire))
    }

    /// Advance to the next mode and return it.
    pub fn cycle(&self) -> ProcessingMode {
        let previous = self
            .slot
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(ProcessingMode::from_u8(raw).next() as u8)
            })
            .unwrap_or_default();
        ProcessingMode::from_u8(previous).next()
    }

    /// Store a raw value as a control surface would, unchecked.
    pub fn set_raw(&self, raw: u8) {
        self.slot.store(raw, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_values_fall_back_to_original() {
        assert_eq!(ProcessingMode::from_u8(7), ProcessingMode::Original);
        let control = ModeControl::default();
        control.set_raw(200);
        assert_eq!(control.get(), ProcessingMode::Original);
    }

    #[test]
    fn cycle_wraps_like_the_toggle_button() {
        let control = ModeControl::new(ProcessingMode::Original);
        assert_eq!(control.cycle(), ProcessingMode::Grayscale);
        assert_eq!(control.cycle(), ProcessingMode::EdgeDetect);
        assert_eq!(control.cycle(), ProcessingMode::Original);
        assert_eq!(control.get(), ProcessingMode::Original);
    }

    #[test]
    fn clones_share_one_slot() {
        let control = ModeControl::default();
        let ui = control.clone();
        ui.set(ProcessingMode::EdgeDetect);
        assert_eq!(control.get(), ProcessingMode::EdgeDetect);
    }

    #[test]
    fn parses_command_words() {
        assert_eq!("gray".parse::<ProcessingMode>(), Ok(ProcessingMode::Grayscale));
        assert_eq!(" Canny ".parse::<ProcessingMode>(), Ok(ProcessingMode::EdgeDetect));
        assert_eq!("2".parse::<ProcessingMode>(), Ok(ProcessingMode::EdgeDetect));
        assert!("sepia".parse::<ProcessingMode>().is_err());
    }
}
