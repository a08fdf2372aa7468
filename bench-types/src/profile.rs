//! Network condition profiles and the value types they are built from.
//!
//! A [`NetworkConditionProfile`] is an immutable value with structural
//! equality: two profiles built from the same tuple compare equal, hash
//! equal and order equal, so a profile can be used directly as a map key.
//!
//! Every profile has a compact label (`10Mbps-50ms-0-60s`) which is also
//! the suffix of its dataset directory (`data-10Mbps-50ms-0-60s`). Both
//! forms parse back into the same profile.

use crate::error::ProfileError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Prefix of every dataset directory name.
pub const DATASET_DIR_PREFIX: &str = "data-";

// ============================================================================
// Rate
// ============================================================================

/// Bandwidth cap in bits per second. Zero means uncapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rate(u64);

impl Rate {
    /// No bandwidth cap.
    pub const UNLIMITED: Rate = Rate(0);

    /// Create a rate from bits per second.
    pub const fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    /// Create a rate from kilobits per second.
    pub const fn from_kbps(kbps: u64) -> Self {
        Self(kbps * 1_000)
    }

    /// Create a rate from megabits per second.
    pub const fn from_mbps(mbps: u64) -> Self {
        Self(mbps * 1_000_000)
    }

    /// Bits per second (zero when uncapped).
    pub fn bits_per_second(&self) -> u64 {
        self.0
    }

    /// True when no bandwidth cap applies.
    pub fn is_unlimited(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "unlimited");
        }
        for (unit, factor) in [("Gbps", 1_000_000_000), ("Mbps", 1_000_000), ("Kbps", 1_000)] {
            if self.0 % factor == 0 {
                return write!(f, "{}{}", self.0 / factor, unit);
            }
        }
        write!(f, "{}bps", self.0)
    }
}

impl FromStr for Rate {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(Self::UNLIMITED);
        }
        let invalid = || ProfileError::InvalidRate(s.to_string());
        let (number, unit) = split_number(s);
        let factor: u64 = match unit.to_ascii_lowercase().as_str() {
            "" | "bps" | "bit" => 1,
            "kbps" | "kbit" => 1_000,
            "mbps" | "mbit" => 1_000_000,
            "gbps" | "gbit" => 1_000_000_000,
            _ => return Err(invalid()),
        };
        scale(number, factor).map(Self).ok_or_else(invalid)
    }
}

impl TryFrom<String> for Rate {
    type Error = ProfileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rate> for String {
    fn from(rate: Rate) -> Self {
        rate.to_string()
    }
}

// ============================================================================
// LossRate
// ============================================================================

/// Independent per-packet loss probability, stored in parts per million.
///
/// Integer storage keeps profiles `Eq + Hash + Ord`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct LossRate(u32);

impl LossRate {
    /// Parts per million equal to certain loss.
    pub const PPM_MAX: u32 = 1_000_000;

    /// No loss.
    pub const ZERO: LossRate = LossRate(0);

    /// Create a loss rate from a fraction in [0, 1].
    pub fn from_fraction(fraction: f64) -> Result<Self, ProfileError> {
        if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
            return Err(ProfileError::LossRateOutOfRange(fraction.to_string()));
        }
        Ok(Self((fraction * Self::PPM_MAX as f64).round() as u32))
    }

    /// Create a loss rate from parts per million.
    pub fn from_ppm(ppm: u32) -> Result<Self, ProfileError> {
        if ppm > Self::PPM_MAX {
            return Err(ProfileError::LossRateOutOfRange(format!("{}ppm", ppm)));
        }
        Ok(Self(ppm))
    }

    /// Parts per million.
    pub fn ppm(&self) -> u32 {
        self.0
    }

    /// Loss probability as a fraction in [0, 1].
    pub fn as_fraction(&self) -> f64 {
        self.0 as f64 / Self::PPM_MAX as f64
    }

    /// Loss probability as a percentage in [0, 100].
    pub fn as_percent(&self) -> f64 {
        self.0 as f64 / 10_000.0
    }
}

impl fmt::Display for LossRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_fraction())
    }
}

impl FromStr for LossRate {
    type Err = ProfileError;

    /// Accepts a fraction (`0.001`) or a percentage (`0.1%`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ProfileError::InvalidLossRate(s.to_string());
        match s.strip_suffix('%') {
            Some(percent) => {
                let value: f64 = percent.trim().parse().map_err(|_| invalid())?;
                Self::from_fraction(value / 100.0)
            }
            None => {
                let value: f64 = s.parse().map_err(|_| invalid())?;
                Self::from_fraction(value)
            }
        }
    }
}

impl TryFrom<f64> for LossRate {
    type Error = ProfileError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_fraction(value)
    }
}

impl From<LossRate> for f64 {
    fn from(loss: LossRate) -> Self {
        loss.as_fraction()
    }
}

// ============================================================================
// Durations
// ============================================================================

/// Format a duration with the coarsest exact unit (`60s`, `50ms`, `250us`, `7ns`).
pub fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 && d.as_secs() > 0 {
        format!("{}s", d.as_secs())
    } else if d.subsec_nanos() % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else if d.subsec_nanos() % 1_000 == 0 {
        format!("{}us", d.as_micros())
    } else {
        format!("{}ns", d.as_nanos())
    }
}

/// Parse a duration such as `60s`, `50ms`, `1.5s`, `250us` or `2m`.
pub fn parse_duration(s: &str) -> Result<Duration, ProfileError> {
    let s = s.trim();
    let invalid = || ProfileError::InvalidDuration(s.to_string());
    let (number, unit) = split_number(s);
    let nanos_per_unit: u64 = match unit {
        "ns" => 1,
        "us" | "µs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return Err(invalid()),
    };
    scale(number, nanos_per_unit)
        .map(Duration::from_nanos)
        .ok_or_else(invalid)
}

/// Serde adapter storing a [`Duration`] as a string such as `"50ms"`.
///
/// Use with `#[serde(with = "duration_str")]`.
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as a duration string.
    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    /// Deserialize from a duration string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Split `"12.5Mbps"` into `("12.5", "Mbps")`.
fn split_number(s: &str) -> (&str, &str) {
    let idx = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    (&s[..idx], s[idx..].trim())
}

/// Multiply a decimal string by an integer unit factor.
fn scale(number: &str, factor: u64) -> Option<u64> {
    if number.is_empty() {
        return None;
    }
    if number.contains('.') {
        let value: f64 = number.parse().ok()?;
        let scaled = (value * factor as f64).round();
        if !scaled.is_finite() || scaled < 0.0 || scaled > u64::MAX as f64 {
            return None;
        }
        Some(scaled as u64)
    } else {
        number.parse::<u64>().ok()?.checked_mul(factor)
    }
}

// ============================================================================
// NetworkConditionProfile
// ============================================================================

/// One impairment configuration: bandwidth cap, propagation delay,
/// loss rate and how long the workload runs under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ProfileRepr", into = "ProfileRepr")]
pub struct NetworkConditionProfile {
    bandwidth: Rate,
    delay: Duration,
    loss_rate: LossRate,
    test_duration: Duration,
}

impl NetworkConditionProfile {
    /// Build a profile. The test duration must be non-zero.
    pub fn new(
        bandwidth: Rate,
        delay: Duration,
        loss_rate: LossRate,
        test_duration: Duration,
    ) -> Result<Self, ProfileError> {
        if test_duration.is_zero() {
            return Err(ProfileError::ZeroTestDuration);
        }
        Ok(Self {
            bandwidth,
            delay,
            loss_rate,
            test_duration,
        })
    }

    /// Bandwidth cap.
    pub fn bandwidth(&self) -> Rate {
        self.bandwidth
    }

    /// One-way propagation delay added per interface.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Independent per-packet loss probability.
    pub fn loss_rate(&self) -> LossRate {
        self.loss_rate
    }

    /// How long the workload runs.
    pub fn test_duration(&self) -> Duration {
        self.test_duration
    }

    /// True when the profile imposes no impairment at all.
    pub fn is_baseline(&self) -> bool {
        self.bandwidth.is_unlimited() && self.delay.is_zero() && self.loss_rate == LossRate::ZERO
    }

    /// Compact label: `<bandwidth>-<delay>-<loss>-<duration>`.
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// Name of the directory holding this profile's results.
    pub fn dataset_dir_name(&self) -> String {
        format!("{}{}", DATASET_DIR_PREFIX, self)
    }

    /// Parse a dataset directory name back into its profile.
    pub fn from_dataset_dir_name(name: &str) -> Result<Self, ProfileError> {
        let label = name
            .strip_prefix(DATASET_DIR_PREFIX)
            .ok_or_else(|| ProfileError::InvalidLabel {
                label: name.to_string(),
                reason: format!("missing {:?} prefix", DATASET_DIR_PREFIX),
            })?;
        label.parse()
    }
}

impl fmt::Display for NetworkConditionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.bandwidth,
            format_duration(self.delay),
            self.loss_rate,
            format_duration(self.test_duration)
        )
    }
}

impl FromStr for NetworkConditionProfile {
    type Err = ProfileError;

    /// Parses a label, with or without the `data-` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim();
        let label = label.strip_prefix(DATASET_DIR_PREFIX).unwrap_or(label);
        let parts: Vec<&str> = label.split('-').collect();
        if parts.len() != 4 {
            return Err(ProfileError::InvalidLabel {
                label: s.to_string(),
                reason: format!("expected 4 '-'-separated fields, found {}", parts.len()),
            });
        }
        Self::new(
            parts[0].parse()?,
            parse_duration(parts[1])?,
            parts[2].parse()?,
            parse_duration(parts[3])?,
        )
    }
}

/// Serialized form: either a label string or explicit fields.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ProfileRepr {
    Label(String),
    Fields {
        bandwidth: Rate,
        #[serde(with = "duration_str")]
        delay: Duration,
        loss_rate: LossRate,
        #[serde(with = "duration_str")]
        test_duration: Duration,
    },
}

impl TryFrom<ProfileRepr> for NetworkConditionProfile {
    type Error = ProfileError;

    fn try_from(repr: ProfileRepr) -> Result<Self, Self::Error> {
        match repr {
            ProfileRepr::Label(label) => label.parse(),
            ProfileRepr::Fields {
                bandwidth,
                delay,
                loss_rate,
                test_duration,
            } => Self::new(bandwidth, delay, loss_rate, test_duration),
        }
    }
}

impl From<NetworkConditionProfile> for ProfileRepr {
    fn from(p: NetworkConditionProfile) -> Self {
        ProfileRepr::Fields {
            bandwidth: p.bandwidth,
            delay: p.delay,
            loss_rate: p.loss_rate,
            test_duration: p.test_duration,
        }
    }
}
