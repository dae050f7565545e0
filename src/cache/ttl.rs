//! TTL Presets
//!
//! Named cache lifetimes so call sites pick a lifetime by intent.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CacheError;

/// One minute.
pub const SHORT: Duration = Duration::from_secs(60);
/// Five minutes. Also the default TTL.
pub const MEDIUM: Duration = Duration::from_secs(300);
/// Thirty minutes.
pub const LONG: Duration = Duration::from_secs(1800);
/// Lives as long as the cache instance.
pub const SESSION: Duration = Duration::MAX;
/// Stored but never served.
pub const NONE: Duration = Duration::ZERO;

/// TTL used when a caller does not pick one.
pub const DEFAULT_TTL: Duration = MEDIUM;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlPreset {
    Short,
    Medium,
    Long,
    Session,
    None,
}

impl TtlPreset {
    pub fn duration(self) -> Duration {
        match self {
            TtlPreset::Short => SHORT,
            TtlPreset::Medium => MEDIUM,
            TtlPreset::Long => LONG,
            TtlPreset::Session => SESSION,
            TtlPreset::None => NONE,
        }
    }
}

impl From<TtlPreset> for Duration {
    fn from(preset: TtlPreset) -> Self {
        preset.duration()
    }
}

impl FromStr for TtlPreset {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(TtlPreset::Short),
            "medium" => Ok(TtlPreset::Medium),
            "long" => Ok(TtlPreset::Long),
            "session" => Ok(TtlPreset::Session),
            "none" => Ok(TtlPreset::None),
            other => Err(CacheError::InvalidRequest(format!(
                "Unknown TTL preset: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_durations() {
        assert_eq!(TtlPreset::Short.duration(), Duration::from_secs(60));
        assert_eq!(TtlPreset::Medium.duration(), Duration::from_millis(300_000));
        assert_eq!(TtlPreset::Long.duration(), Duration::from_secs(1800));
        assert_eq!(TtlPreset::None.duration(), Duration::ZERO);
        assert!(TtlPreset::Session.duration() > Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn test_preset_parse() {
        assert_eq!("Long".parse::<TtlPreset>().unwrap(), TtlPreset::Long);
        assert_eq!("none".parse::<TtlPreset>().unwrap(), TtlPreset::None);
        assert!("forever".parse::<TtlPreset>().is_err());
    }
}
