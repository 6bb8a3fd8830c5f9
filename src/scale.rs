//! Fixed-point scaling between physical quantities and their 16-bit wire
//! representation, plus the power-factor label set used by the supply.
//!
//! The supply expects every voltage and current field as a 4-hex-digit word
//! whose decimal scale depends on the magnitude of the value: one integer
//! digit scales by 10000, two digits by 1000, three digits by 100. Larger
//! values cannot be represented.

use crate::error::{Error, Result};

/// Selects the decimal scale factor for `value` from the number of digits
/// before the decimal point.
pub fn select_scale(value: f64) -> Result<u32> {
    if value < 0.0 {
        return Err(Error::ValueOutOfRange(value));
    }
    if value < 10.0 {
        Ok(10_000)
    } else if value < 100.0 {
        Ok(1_000)
    } else if value < 1000.0 {
        Ok(100)
    } else {
        Err(Error::ValueOutOfRange(value))
    }
}

/// Encodes a physical value as a scaled 16-bit word.
///
/// Fails with [`Error::ValueOutOfRange`] for negative input or when the
/// scaled integer does not fit 16 bits.
pub fn encode_fixed(value: f64) -> Result<u16> {
    let scale = select_scale(value)?;
    let scaled = (value * scale as f64) as i64;
    u16::try_from(scaled).map_err(|_| Error::ValueOutOfRange(value))
}

/// Decodes a big-endian byte sequence into a physical value by dividing its
/// integer interpretation by `divisor`.
pub fn decode_fixed(raw: &[u8], divisor: f64) -> f64 {
    let mut acc: u64 = 0;
    for &byte in raw {
        acc = (acc << 8) | u64::from(byte);
    }
    acc as f64 / divisor
}

/// The closed set of power-factor settings the supply understands.
///
/// `L` marks an inductive (lagging) load angle, `C` a capacitive (leading)
/// one. Each label maps to the fixed angle code the supply expects on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerFactor {
    /// Unity power factor, angle code 0.
    Unity,
    /// 0.5 lagging (60 degrees).
    HalfLagging,
    /// 0.5 leading (30 degrees).
    HalfLeading,
    /// 0.8 leading (32.3 degrees).
    P8Leading,
    /// 0.8 lagging (36.8 degrees).
    P8Lagging,
}

impl PowerFactor {
    /// The 16-bit angle code sent to the supply.
    pub const fn code(self) -> u16 {
        match self {
            PowerFactor::Unity => 0x0000,
            PowerFactor::HalfLagging => 0x1770,
            PowerFactor::HalfLeading => 0x7530,
            PowerFactor::P8Leading => 0x7E39,
            PowerFactor::P8Lagging => 0x0E67,
        }
    }

    /// Parses a configuration label.
    ///
    /// Unrecognized labels deliberately fall back to [`PowerFactor::Unity`];
    /// the supply treats the zero angle code as a safe setting, and the
    /// historical tooling relied on this default.
    pub fn from_label(label: &str) -> Self {
        match label {
            "0.5L" => PowerFactor::HalfLagging,
            "0.5C" => PowerFactor::HalfLeading,
            "0.8C" => PowerFactor::P8Leading,
            "0.8L" => PowerFactor::P8Lagging,
            _ => PowerFactor::Unity,
        }
    }

    /// Classifies a decoded load angle (degrees) into the label bands the
    /// supply reports, or `None` when it falls outside every band.
    pub fn classify_angle(angle: f64) -> Option<Self> {
        if angle <= 1.0 {
            Some(PowerFactor::Unity)
        } else if (59.0..=61.0).contains(&angle) {
            Some(PowerFactor::HalfLagging)
        } else if (29.0..=31.0).contains(&angle) {
            Some(PowerFactor::HalfLeading)
        } else if (31.0..=33.0).contains(&angle) {
            Some(PowerFactor::P8Leading)
        } else if (35.0..=37.0).contains(&angle) {
            Some(PowerFactor::P8Lagging)
        } else {
            None
        }
    }

    /// The configuration label for this setting.
    pub const fn label(self) -> &'static str {
        match self {
            PowerFactor::Unity => "1.0",
            PowerFactor::HalfLagging => "0.5L",
            PowerFactor::HalfLeading => "0.5C",
            PowerFactor::P8Leading => "0.8C",
            PowerFactor::P8Lagging => "0.8L",
        }
    }
}

impl std::fmt::Display for PowerFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for PowerFactor {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(PowerFactor::from_label(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn scale_selection_by_digit_count() {
        assert_matches!(select_scale(1.0), Ok(10_000));
        assert_matches!(select_scale(9.99), Ok(10_000));
        assert_matches!(select_scale(10.0), Ok(1_000));
        assert_matches!(select_scale(99.9), Ok(1_000));
        assert_matches!(select_scale(100.0), Ok(100));
        assert_matches!(select_scale(999.0), Ok(100));
        assert_matches!(select_scale(1000.0), Err(Error::ValueOutOfRange(..)));
        assert_matches!(select_scale(-1.0), Err(Error::ValueOutOfRange(..)));
    }

    #[test]
    fn encode_known_words() {
        // 220 V scales by 100, 2 A by 10000.
        assert_matches!(encode_fixed(220.0), Ok(0x55F0));
        assert_matches!(encode_fixed(2.0), Ok(0x4E20));
        assert_matches!(encode_fixed(3.0), Ok(0x7530));
    }

    #[test]
    fn encode_rejects_unrepresentable() {
        // 7 * 10000 = 70000 does not fit 16 bits.
        assert_matches!(encode_fixed(7.0), Err(Error::ValueOutOfRange(..)));
        assert_matches!(encode_fixed(-0.1), Err(Error::ValueOutOfRange(..)));
    }

    #[test]
    fn fixed_point_round_trip() {
        for v in [1.0, 10.0, 100.0, 499.0] {
            let scale = select_scale(v).unwrap() as f64;
            let word = encode_fixed(v).unwrap();
            let back = decode_fixed(&word.to_be_bytes(), scale);
            // One scale step of rounding error is acceptable.
            assert!((back - v).abs() <= 1.0 / scale, "{v} -> {back}");
        }
    }

    #[test]
    fn decode_fixed_big_endian() {
        assert_eq!(decode_fixed(&[0x0A, 0xAB, 0xDF], 10_000.0), 69.9359);
        assert_eq!(decode_fixed(&[0x00, 0x00], 1.0), 0.0);
    }

    #[test]
    fn power_factor_codes_are_total() {
        assert_eq!(PowerFactor::from_label("0.5L").code(), 0x1770);
        assert_eq!(PowerFactor::from_label("0.5C").code(), 0x7530);
        assert_eq!(PowerFactor::from_label("0.8C").code(), 0x7E39);
        assert_eq!(PowerFactor::from_label("0.8L").code(), 0x0E67);
    }

    #[test]
    fn unknown_label_defaults_to_unity() {
        // Deliberate silent default, not an error.
        assert_eq!(PowerFactor::from_label("0.9L"), PowerFactor::Unity);
        assert_eq!(PowerFactor::from_label(""), PowerFactor::Unity);
        assert_eq!(PowerFactor::from_label("1.0").code(), 0x0000);
    }

    #[test]
    fn angle_band_classification() {
        assert_eq!(PowerFactor::classify_angle(0.3), Some(PowerFactor::Unity));
        assert_eq!(
            PowerFactor::classify_angle(60.0),
            Some(PowerFactor::HalfLagging)
        );
        assert_eq!(
            PowerFactor::classify_angle(30.0),
            Some(PowerFactor::HalfLeading)
        );
        assert_eq!(
            PowerFactor::classify_angle(32.3),
            Some(PowerFactor::P8Leading)
        );
        assert_eq!(
            PowerFactor::classify_angle(36.8),
            Some(PowerFactor::P8Lagging)
        );
        assert_eq!(PowerFactor::classify_angle(45.0), None);
    }
}
