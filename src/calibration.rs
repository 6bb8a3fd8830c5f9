//! Gain calibration for the meter's voltage, current, power and
//! phase-angle channels.
//!
//! Every calibration target runs the same single-pass cycle: read the
//! present gain, read the measured quantity under the reference excitation,
//! derive the corrected gain, write it back, and re-read the measurement so
//! the caller can judge the result. The engine never loops on its own;
//! bounded retries are a caller decision.

use crate::error::{Error, Result};
use crate::meter_client::MeterClient;
use std::io::{Read, Write};

/// The three electrical phases, calibrated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    R,
    Y,
    B,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::R, Phase::Y, Phase::B];

    const fn index(self) -> usize {
        match self {
            Phase::R => 0,
            Phase::Y => 1,
            Phase::B => 2,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Phase::R => write!(f, "R"),
            Phase::Y => write!(f, "Y"),
            Phase::B => write!(f, "B"),
        }
    }
}

/// Reference voltage applied during voltage calibration, in volts.
pub const VOLTAGE_REFERENCE: f64 = 220.0;
/// Reference current applied during current calibration, in amps.
pub const CURRENT_REFERENCE: f64 = 3.0;
/// Reference active power for the 220 V / 2 A / unity calibration point,
/// in watts.
pub const POWER_REFERENCE: f64 = 440.0;
/// Reference load angle cosine: cos(60°), the 0.5L calibration point.
pub const PHASE_REFERENCE_COS: f64 = 0.5;

/// Substitute gain when the voltage gain register reads zero.
pub const VOLTAGE_BASELINE_GAIN: u16 = 52800;
/// Substitute gain when the current gain register reads zero.
pub const CURRENT_BASELINE_GAIN: u16 = 30000;

const POWER_GAIN_SCALE: f64 = 32768.0;
const PHASE_GAIN_SCALE: f64 = 3763.739;

/// Measurement register pair and gain register for one ratio-calibrated
/// phase channel.
#[derive(Debug, Clone, Copy)]
pub struct RatioTarget {
    pub pair: (u16, u16),
    pub gain_addr: u16,
}

/// Voltage channels, R/Y/B order.
pub const VOLTAGE_TARGETS: [RatioTarget; 3] = [
    RatioTarget { pair: (0x00D9, 0x00E9), gain_addr: 0x0061 },
    RatioTarget { pair: (0x00DA, 0x00EA), gain_addr: 0x0065 },
    RatioTarget { pair: (0x00DB, 0x00EB), gain_addr: 0x0069 },
];

/// Current channels, R/Y/B order.
pub const CURRENT_TARGETS: [RatioTarget; 3] = [
    RatioTarget { pair: (0x00DD, 0x00ED), gain_addr: 0x0062 },
    RatioTarget { pair: (0x00DE, 0x00EE), gain_addr: 0x0066 },
    RatioTarget { pair: (0x00DF, 0x00EF), gain_addr: 0x006A },
];

/// Active-power channels, R/Y/B order.
pub const POWER_TARGETS: [RatioTarget; 3] = [
    RatioTarget { pair: (0x00B1, 0x00C1), gain_addr: 0x0063 },
    RatioTarget { pair: (0x00B2, 0x00C2), gain_addr: 0x0067 },
    RatioTarget { pair: (0x00B3, 0x00C3), gain_addr: 0x006B },
];

/// Load-angle source register and gain register for one phase.
#[derive(Debug, Clone, Copy)]
pub struct AngleTarget {
    pub source: u16,
    pub gain_addr: u16,
}

/// Phase-angle channels, R/Y/B order.
pub const ANGLE_TARGETS: [AngleTarget; 3] = [
    AngleTarget { source: 0x00F9, gain_addr: 0x0060 },
    AngleTarget { source: 0x00FA, gain_addr: 0x0064 },
    AngleTarget { source: 0x00FB, gain_addr: 0x0068 },
];

/// A zero gain register means "uncalibrated", not a valid zero
/// coefficient; the quantity's baseline constant stands in for it.
pub fn effective_baseline(current_gain: u16, fallback: u16) -> u16 {
    if current_gain == 0 {
        fallback
    } else {
        current_gain
    }
}

/// Ratio correction for voltage and current channels:
/// `round((reference / measured) * baseline)`.
pub fn ratio_gain(reference: f64, measured: f64, baseline: u16) -> Result<u16> {
    if measured == 0.0 {
        return Err(Error::DivisionByZero);
    }
    let gain = (reference / measured) * f64::from(baseline);
    let rounded = gain.round();
    if !(0.0..=f64::from(u16::MAX)).contains(&rounded) {
        return Err(Error::GainOutOfRange(gain));
    }
    Ok(rounded as u16)
}

/// Power correction from the relative error against the reference point:
/// `error = (measured - 440) / 440`, `round(-error / (1 + error) * 32768)`.
pub fn power_gain(measured: f64) -> Result<i16> {
    let error = (measured - POWER_REFERENCE) / POWER_REFERENCE;
    let denominator = 1.0 + error;
    if denominator == 0.0 {
        return Err(Error::DivisionByZero);
    }
    let gain = (-error / denominator) * POWER_GAIN_SCALE;
    let rounded = gain.round();
    if !(f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&rounded) {
        return Err(Error::GainOutOfRange(gain));
    }
    Ok(rounded as i16)
}

/// Phase correction from the measured load angle against the 60° reference:
/// `error = (cos(angle) - 0.5) / 0.5`, `round(error * 3763.739)`.
pub fn phase_gain(angle_degrees: f64) -> Result<i16> {
    let cosine = (angle_degrees * std::f64::consts::PI / 180.0).cos();
    let error = (cosine - PHASE_REFERENCE_COS) / PHASE_REFERENCE_COS;
    let gain = error * PHASE_GAIN_SCALE;
    let rounded = gain.round();
    if !(f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&rounded) {
        return Err(Error::GainOutOfRange(gain));
    }
    Ok(rounded as i16)
}

/// Encodes a signed gain as the unsigned 16-bit two's-complement wire
/// value.
pub fn to_twos_complement(gain: i16) -> u16 {
    gain as u16
}

/// The record of one completed calibration pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationOutcome {
    /// Gain register content before the pass.
    pub previous_gain: u16,
    /// Measured value the correction was derived from.
    pub measured: f64,
    /// Gain written back, in wire encoding.
    pub new_gain: u16,
    /// Measurement re-read after the write.
    pub verified: f64,
}

/// Drives calibration cycles over a meter client.
pub struct Calibrator<'a, S: Read + Write> {
    meter: &'a mut MeterClient<S>,
}

impl<'a, S: Read + Write> Calibrator<'a, S> {
    pub fn new(meter: &'a mut MeterClient<S>) -> Self {
        Self { meter }
    }

    /// Calibrates one voltage channel against [`VOLTAGE_REFERENCE`].
    pub fn calibrate_voltage(&mut self, phase: Phase) -> Result<CalibrationOutcome> {
        let target = VOLTAGE_TARGETS[phase.index()];
        self.calibrate_ratio(target.pair, target.gain_addr)
    }

    /// Calibrates one current channel against [`CURRENT_REFERENCE`].
    pub fn calibrate_current(&mut self, phase: Phase) -> Result<CalibrationOutcome> {
        let target = CURRENT_TARGETS[phase.index()];
        self.calibrate_ratio(target.pair, target.gain_addr)
    }

    /// Runs the ratio correction cycle for an explicit register pair.
    ///
    /// The pair decides the quantity class: it must belong to the known
    /// voltage or current address sets, anything else is
    /// [`Error::NoValidAddress`].
    pub fn calibrate_ratio(&mut self, pair: (u16, u16), gain_addr: u16) -> Result<CalibrationOutcome> {
        let (reference, fallback) = if VOLTAGE_TARGETS.iter().any(|t| t.pair == pair) {
            (VOLTAGE_REFERENCE, VOLTAGE_BASELINE_GAIN)
        } else if CURRENT_TARGETS.iter().any(|t| t.pair == pair) {
            (CURRENT_REFERENCE, CURRENT_BASELINE_GAIN)
        } else {
            return Err(Error::NoValidAddress(pair.0, pair.1));
        };

        let previous_gain = self.meter.read_register_raw(gain_addr)?;
        let baseline = effective_baseline(previous_gain, fallback);
        let measured = self.meter.read_register_pair(pair.0, pair.1)?;
        let new_gain = ratio_gain(reference, measured, baseline)?;
        log::info!(
            "Gain {gain_addr:#06X}: {previous_gain} -> {new_gain} (measured {measured}, reference {reference})"
        );
        self.meter.write_register(gain_addr, new_gain)?;
        let verified = self.meter.read_register_pair(pair.0, pair.1)?;

        Ok(CalibrationOutcome {
            previous_gain,
            measured,
            new_gain,
            verified,
        })
    }

    /// Calibrates one active-power channel against [`POWER_REFERENCE`].
    pub fn calibrate_power(&mut self, phase: Phase) -> Result<CalibrationOutcome> {
        let target = POWER_TARGETS[phase.index()];
        let previous_gain = self.meter.read_register_raw(target.gain_addr)?;
        let measured = self.meter.read_register_pair(target.pair.0, target.pair.1)?;
        let new_gain = to_twos_complement(power_gain(measured)?);
        log::info!(
            "Power gain {:#06X}: {previous_gain} -> {new_gain:#06X} (measured {measured} W)",
            target.gain_addr
        );
        self.meter.write_register(target.gain_addr, new_gain)?;
        let verified = self.meter.read_register_pair(target.pair.0, target.pair.1)?;

        Ok(CalibrationOutcome {
            previous_gain,
            measured,
            new_gain,
            verified,
        })
    }

    /// Calibrates one phase-angle channel against the 60° reference.
    ///
    /// The gain register is cleared first so the measured angle reflects
    /// the uncorrected channel.
    pub fn calibrate_phase_angle(&mut self, phase: Phase) -> Result<CalibrationOutcome> {
        let target = ANGLE_TARGETS[phase.index()];
        let previous_gain = self.meter.read_register_raw(target.gain_addr)?;
        self.meter.write_register(target.gain_addr, 0)?;
        let measured = self.meter.read_single_register(target.source)?;
        let new_gain = to_twos_complement(phase_gain(measured)?);
        log::info!(
            "Phase gain {:#06X}: {previous_gain} -> {new_gain:#06X} (measured {measured}°)",
            target.gain_addr
        );
        self.meter.write_register(target.gain_addr, new_gain)?;
        let verified = self.meter.read_single_register(target.source)?;

        Ok(CalibrationOutcome {
            previous_gain,
            measured,
            new_gain,
            verified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter_protocol as proto;
    use crate::mock_serial::MockSerial;
    use assert_matches::assert_matches;

    const STATION: [u8; 6] = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00];

    #[test]
    fn voltage_gain_reference_case() {
        assert_eq!(ratio_gain(220.0, 219.0, 52800).unwrap(), 53041);
    }

    #[test]
    fn ratio_gain_zero_measured_is_typed_failure() {
        assert_matches!(ratio_gain(220.0, 0.0, 52800), Err(Error::DivisionByZero));
    }

    #[test]
    fn ratio_gain_overflow_is_typed_failure() {
        assert_matches!(
            ratio_gain(220.0, 1.0, 52800),
            Err(Error::GainOutOfRange(..))
        );
    }

    #[test]
    fn power_gain_reference_case() {
        let gain = power_gain(450.0).unwrap();
        assert_eq!(gain, -728);
        assert_eq!(to_twos_complement(gain), 0xFD28);
    }

    #[test]
    fn power_gain_at_reference_is_zero() {
        assert_eq!(power_gain(440.0).unwrap(), 0);
    }

    #[test]
    fn power_gain_zero_measured_is_typed_failure() {
        // measured == 0 drives the error term to -1 and the denominator to
        // zero; this must never produce an infinite gain.
        assert_matches!(power_gain(0.0), Err(Error::DivisionByZero));
    }

    #[test]
    fn phase_gain_reference_case() {
        let gain = phase_gain(60.5).unwrap();
        assert_eq!(gain, -57);
        assert_eq!(to_twos_complement(gain), 0xFFC7);
    }

    #[test]
    fn phase_gain_at_reference_angle_is_zero() {
        assert_eq!(phase_gain(60.0).unwrap(), 0);
    }

    #[test]
    fn zero_gain_reads_as_uncalibrated() {
        assert_eq!(effective_baseline(0, VOLTAGE_BASELINE_GAIN), 52800);
        assert_eq!(effective_baseline(51234, VOLTAGE_BASELINE_GAIN), 51234);
        assert_eq!(effective_baseline(0, CURRENT_BASELINE_GAIN), 30000);
    }

    fn read_reply(wire_addr: u16, value: u16) -> Vec<u8> {
        let mut data = wire_addr.to_le_bytes().to_vec();
        data.extend_from_slice(&value.to_le_bytes());
        proto::Frame::new(STATION, proto::CONTROL_READ | proto::CONTROL_REPLY, data).encode()
    }

    fn write_reply() -> Vec<u8> {
        proto::Frame::new(
            STATION,
            proto::CONTROL_WRITE | proto::CONTROL_REPLY,
            Vec::new(),
        )
        .encode()
    }

    #[test]
    fn voltage_calibration_cycle() {
        let mut mock = MockSerial::new();
        // Present gain, measured pair, write echo, verification pair.
        mock.queue_read_data(&read_reply(0xD061, 52800));
        mock.queue_read_data(&read_reply(0xD0D9, 21900)); // 219.00 V
        mock.queue_read_data(&read_reply(0xD0E9, 0));
        mock.queue_read_data(&write_reply());
        mock.queue_read_data(&read_reply(0xD0D9, 22000)); // 220.00 V
        mock.queue_read_data(&read_reply(0xD0E9, 0));

        let mut client = MeterClient::with_station(mock, STATION);
        let outcome = Calibrator::new(&mut client)
            .calibrate_voltage(Phase::R)
            .unwrap();

        assert_eq!(outcome.previous_gain, 52800);
        assert!((outcome.measured - 219.0).abs() < 1e-9);
        assert_eq!(outcome.new_gain, 53041);
        assert!((outcome.verified - 220.0).abs() < 1e-9);
    }

    #[test]
    fn voltage_calibration_substitutes_baseline_for_zero_gain() {
        let mut mock = MockSerial::new();
        mock.queue_read_data(&read_reply(0xD061, 0)); // uncalibrated
        mock.queue_read_data(&read_reply(0xD0D9, 21900));
        mock.queue_read_data(&read_reply(0xD0E9, 0));
        mock.queue_read_data(&write_reply());
        mock.queue_read_data(&read_reply(0xD0D9, 22000));
        mock.queue_read_data(&read_reply(0xD0E9, 0));

        let mut client = MeterClient::with_station(mock, STATION);
        let outcome = Calibrator::new(&mut client)
            .calibrate_voltage(Phase::R)
            .unwrap();

        assert_eq!(outcome.new_gain, 53041);
    }

    #[test]
    fn phase_angle_calibration_clears_gain_first() {
        let mut mock = MockSerial::new();
        mock.queue_read_data(&read_reply(0xD060, 0x0123)); // previous gain
        mock.queue_read_data(&write_reply()); // clear
        mock.queue_read_data(&read_reply(0xD0F9, 605)); // 60.5 degrees
        mock.queue_read_data(&write_reply()); // corrected gain
        mock.queue_read_data(&read_reply(0xD0F9, 600)); // verification

        let mut client = MeterClient::with_station(mock, STATION);
        let outcome = Calibrator::new(&mut client)
            .calibrate_phase_angle(Phase::R)
            .unwrap();

        assert_eq!(outcome.previous_gain, 0x0123);
        assert!((outcome.measured - 60.5).abs() < 1e-9);
        assert_eq!(outcome.new_gain, 0xFFC7);
        assert!((outcome.verified - 60.0).abs() < 1e-9);
    }

    #[test]
    fn ratio_calibration_rejects_foreign_pairs() {
        let mock = MockSerial::new();
        let mut client = MeterClient::with_station(mock, STATION);

        // A power pair is a known register pair but not a ratio target.
        assert_matches!(
            Calibrator::new(&mut client).calibrate_ratio((0x00B1, 0x00C1), 0x0063),
            Err(Error::NoValidAddress(0x00B1, 0x00C1))
        );
    }
}
