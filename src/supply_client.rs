//! Synchronous client for the programmable power supply.

use crate::error::{Error, Result};
use crate::scale::PowerFactor;
use crate::supply_protocol as proto;
use std::io::{Read, Write};

fn hex_dump(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Synchronous client for the supply's serial link.
///
/// Owns the session exclusively; one command or poll completes before the
/// next is issued.
pub struct SupplyClient<S: Read + Write> {
    session: S,
    trailer: proto::Trailer,
}

impl<S: Read + Write> SupplyClient<S> {
    /// Creates a client using the captured trailer constants.
    pub fn new(session: S) -> Self {
        Self::with_trailer(session, proto::Trailer::Fixed(proto::SET_OUTPUT_TRAILER))
    }

    /// Creates a client with an explicit trailer strategy (hardware
    /// verification of the CRC hypothesis).
    pub fn with_trailer(session: S, trailer: proto::Trailer) -> Self {
        Self { session, trailer }
    }

    /// Commands the reference excitation: the same voltage, current and
    /// power factor on all three phases.
    pub fn set_output(
        &mut self,
        voltage: f64,
        current: f64,
        power_factor: PowerFactor,
    ) -> Result<()> {
        let frame = proto::build_set_output_frame(voltage, current, power_factor, self.trailer)?;
        log::info!("Setting supply output: {voltage} V, {current} A, PF {power_factor}");
        self.send(&frame)
    }

    /// Drives every output field to zero.
    pub fn reset_output(&mut self) -> Result<()> {
        let trailer = match self.trailer {
            proto::Trailer::Fixed(_) => proto::Trailer::Fixed(proto::RESET_TRAILER),
            other => other,
        };
        let frame = proto::build_reset_frame(trailer);
        log::info!("Resetting supply output");
        self.send(&frame)
    }

    /// Polls the supply for its present output and parses the per-phase
    /// measurements.
    pub fn poll_output(&mut self) -> Result<proto::OutputReading> {
        self.send(&proto::build_poll_request())?;
        let response = self.drain_response()?;
        if response.is_empty() {
            return Err(Error::Timeout);
        }
        log::debug!("Supply frame received: {}", hex_dump(&response));
        proto::parse_output_response(&response)
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        log::debug!("Supply frame sent: {}", hex_dump(frame));
        self.session.write_all(frame)?;
        self.session.flush()?;
        Ok(())
    }

    /// Collects response bytes until the per-read timeout signals the end
    /// of the device's transmission.
    fn drain_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            match self.session.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => response.extend_from_slice(&chunk[..count]),
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => break,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::Io(err)),
            }
        }
        Ok(response)
    }
}
