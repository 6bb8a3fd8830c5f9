//! Frame codec for the programmable three-phase supply.
//!
//! The supply is commanded with a fixed 46-byte binary frame: a preamble,
//! a frame id, a command header, three scaled voltage words, three current
//! slots, three power-factor angle codes, a fixed tail and a 2-byte trailer.
//! Its present output is read back with a fixed 8-byte poll request whose
//! response carries the per-phase measurements at fixed byte offsets.

use crate::error::{Error, Result};
use crate::scale::{self, PowerFactor};

/// Frame preamble preceding every command frame.
pub const PREAMBLE: [u8; 5] = [0xF9, 0xF9, 0xF9, 0xF9, 0xF9];
/// Frame id of the set-output command.
pub const FRAME_ID: u8 = 0xB1;
/// Command header following the frame id (length/command bytes and the
/// 50.00 Hz frequency word).
pub const HEADER: [u8; 8] = [0x10, 0x00, 0x02, 0x00, 0x10, 0x20, 0x13, 0x88];
/// Fixed tail bytes preceding the trailer.
pub const TAIL: [u8; 6] = [0x2E, 0xE0, 0x5D, 0xC0, 0x00, 0x00];

/// Trailer constant observed on set-output captures of this field layout.
pub const SET_OUTPUT_TRAILER: u16 = 0x0566;
/// Trailer constant observed on the all-zero reset capture.
pub const RESET_TRAILER: u16 = 0xD404;

/// The fixed poll request asking the supply for its present output. The
/// last two bytes are a CRC-16/MODBUS over the first six.
pub const POLL_REQUEST: [u8; 8] = [0x37, 0x03, 0x00, 0x00, 0x00, 0x38, 0x41, 0x8E];

/// Total length of a command frame.
pub const COMMAND_FRAME_LEN: usize = 46;

/// Byte offsets of the per-phase voltage fields in the poll response
/// (3 bytes big-endian each, divided by 10000).
pub const VOLTAGE_OFFSETS: [usize; 3] = [14, 18, 22];
/// Byte offsets of the per-phase current fields (3 bytes big-endian each,
/// divided by 1000000 and halved).
pub const CURRENT_OFFSETS: [usize; 3] = [26, 30, 34];
/// Byte offset of the load angle field (3 bytes big-endian, divided by
/// 10000).
pub const ANGLE_OFFSET: usize = 114;

const VOLTAGE_DIVISOR: f64 = 10_000.0;
const CURRENT_DIVISOR: f64 = 1_000_000.0;
const ANGLE_DIVISOR: f64 = 10_000.0;

/// Minimum poll response length covering every accessed offset.
pub const MIN_RESPONSE_LEN: usize = ANGLE_OFFSET + 3;

/// How the 2-byte frame trailer is produced.
///
/// Captures of different field layouts show different trailer constants; it
/// is unresolved whether the device validates them as a checksum. `Fixed`
/// reproduces the captured constants, `Crc16` computes a CRC-16/MODBUS over
/// the frame body (the algorithm the poll request demonstrably uses) for
/// hardware verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trailer {
    /// Append the constant as-is (big-endian, matching the captures).
    Fixed(u16),
    /// Compute CRC-16/MODBUS over the body, appended low byte first.
    Crc16,
}

impl Trailer {
    /// Produces the two trailer bytes for `body` (every frame byte before
    /// the trailer).
    pub fn compute(self, body: &[u8]) -> [u8; 2] {
        match self {
            Trailer::Fixed(value) => value.to_be_bytes(),
            Trailer::Crc16 => crc16_modbus(body).to_le_bytes(),
        }
    }
}

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// One output reading per electrical phase, in R/Y/B order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputReading {
    /// Phase voltages in volts.
    pub voltage: [f64; 3],
    /// Phase currents in amps.
    pub current: [f64; 3],
    /// Load angle in degrees.
    pub angle: f64,
    /// The power-factor band the angle falls into, if any.
    pub power_factor: Option<PowerFactor>,
}

/// Builds the set-output command frame for the given excitation.
///
/// All three phases receive the same voltage, current and power-factor
/// code. Fails with [`Error::ValueOutOfRange`] when a value cannot be
/// encoded as a scaled 16-bit word.
pub fn build_set_output_frame(
    voltage: f64,
    current: f64,
    power_factor: PowerFactor,
    trailer: Trailer,
) -> Result<Vec<u8>> {
    let voltage_word = scale::encode_fixed(voltage)?;
    let current_word = scale::encode_fixed(current)?;
    Ok(assemble_command(
        voltage_word,
        current_word,
        power_factor.code(),
        trailer,
    ))
}

/// Builds the reset frame driving every output field to zero.
pub fn build_reset_frame(trailer: Trailer) -> Vec<u8> {
    assemble_command(0, 0, 0, trailer)
}

fn assemble_command(voltage: u16, current: u16, pf_code: u16, trailer: Trailer) -> Vec<u8> {
    let mut frame = Vec::with_capacity(COMMAND_FRAME_LEN);
    frame.extend_from_slice(&PREAMBLE);
    frame.push(FRAME_ID);
    frame.extend_from_slice(&HEADER);
    for _ in 0..3 {
        frame.extend_from_slice(&voltage.to_be_bytes());
    }
    for _ in 0..3 {
        // Each current slot is padded with a leading zero word.
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(&current.to_be_bytes());
    }
    for _ in 0..3 {
        frame.extend_from_slice(&pf_code.to_be_bytes());
    }
    frame.extend_from_slice(&TAIL);
    let crc = trailer.compute(&frame);
    frame.extend_from_slice(&crc);
    frame
}

/// Returns the fixed poll request frame.
pub fn build_poll_request() -> [u8; 8] {
    POLL_REQUEST
}

/// Extracts the per-phase output values from a poll response.
///
/// Fails with [`Error::ShortFrame`] when the buffer does not cover every
/// accessed offset.
pub fn parse_output_response(frame: &[u8]) -> Result<OutputReading> {
    if frame.len() < MIN_RESPONSE_LEN {
        return Err(Error::ShortFrame {
            got: frame.len(),
            need: MIN_RESPONSE_LEN,
        });
    }

    let mut voltage = [0.0; 3];
    let mut current = [0.0; 3];
    for phase in 0..3 {
        let v = VOLTAGE_OFFSETS[phase];
        voltage[phase] = scale::decode_fixed(&frame[v..v + 3], VOLTAGE_DIVISOR);
        let c = CURRENT_OFFSETS[phase];
        // The sense path reports twice the applied current.
        current[phase] = scale::decode_fixed(&frame[c..c + 3], CURRENT_DIVISOR) / 2.0;
    }
    let angle = scale::decode_fixed(&frame[ANGLE_OFFSET..ANGLE_OFFSET + 3], ANGLE_DIVISOR);

    Ok(OutputReading {
        voltage,
        current,
        angle,
        power_factor: PowerFactor::classify_angle(angle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn hex(s: &str) -> Vec<u8> {
        s.split_whitespace()
            .map(|b| u8::from_str_radix(b, 16).unwrap())
            .collect()
    }

    #[test]
    fn set_output_frame_golden_vector() {
        // 220 V, 2 A, unity power factor, captured trailer.
        let frame = build_set_output_frame(
            220.0,
            2.0,
            PowerFactor::Unity,
            Trailer::Fixed(SET_OUTPUT_TRAILER),
        )
        .unwrap();
        let expected = hex(
            "F9 F9 F9 F9 F9 B1 10 00 02 00 10 20 13 88 \
             55 F0 55 F0 55 F0 \
             00 00 4E 20 00 00 4E 20 00 00 4E 20 \
             00 00 00 00 00 00 \
             2E E0 5D C0 00 00 05 66",
        );
        assert_eq!(frame, expected);
        assert_eq!(frame.len(), COMMAND_FRAME_LEN);
    }

    #[test]
    fn reset_frame_zeroes_every_field() {
        let frame = build_reset_frame(Trailer::Fixed(RESET_TRAILER));
        let expected = hex(
            "F9 F9 F9 F9 F9 B1 10 00 02 00 10 20 13 88 \
             00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 00 \
             00 00 00 00 00 00 \
             2E E0 5D C0 00 00 D4 04",
        );
        assert_eq!(frame, expected);
    }

    #[test]
    fn set_output_frame_rejects_unscalable_values() {
        let result = build_set_output_frame(
            1000.0,
            2.0,
            PowerFactor::Unity,
            Trailer::Fixed(SET_OUTPUT_TRAILER),
        );
        assert_matches!(result, Err(Error::ValueOutOfRange(..)));
    }

    #[test]
    fn poll_request_trailer_is_modbus_crc() {
        let crc = crc16_modbus(&POLL_REQUEST[..6]);
        assert_eq!(crc.to_le_bytes(), [POLL_REQUEST[6], POLL_REQUEST[7]]);
    }

    #[test]
    fn crc16_modbus_check_value() {
        assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
    }

    #[test]
    fn parse_output_response_reads_fixed_offsets() {
        let mut frame = vec![0u8; 120];
        // R phase 220.1234 V, Y 219.0 V, B 221.5 V.
        frame[14..17].copy_from_slice(&[0x21, 0x96, 0x12]); // 2201106
        frame[18..21].copy_from_slice(&[0x21, 0x6A, 0xB0]); // 2190000
        frame[22..25].copy_from_slice(&[0x21, 0xCF, 0xDC]); // 2215900
        // 2 A on each phase: 4000000 raw, halved after the divisor.
        for offset in CURRENT_OFFSETS {
            frame[offset..offset + 3].copy_from_slice(&[0x3D, 0x09, 0x00]);
        }
        // 60 degrees -> 600000 raw.
        frame[114..117].copy_from_slice(&[0x09, 0x27, 0xC0]);

        let reading = parse_output_response(&frame).unwrap();
        assert!((reading.voltage[0] - 220.1106).abs() < 1e-9);
        assert!((reading.voltage[1] - 219.0).abs() < 1e-9);
        assert!((reading.voltage[2] - 221.59).abs() < 1e-9);
        for phase in 0..3 {
            assert!((reading.current[phase] - 2.0).abs() < 1e-9);
        }
        assert!((reading.angle - 60.0).abs() < 1e-9);
        assert_eq!(reading.power_factor, Some(PowerFactor::HalfLagging));
    }

    #[test]
    fn parse_output_response_rejects_short_frame() {
        let frame = vec![0u8; MIN_RESPONSE_LEN - 1];
        assert_matches!(
            parse_output_response(&frame),
            Err(Error::ShortFrame { need, .. }) if need == MIN_RESPONSE_LEN
        );
    }
}
