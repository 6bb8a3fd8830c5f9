//! Synchronous client for the meter's DL/T 645 link.
//!
//! The client owns the serial session exclusively; every operation is one
//! blocking request/response round trip, because the protocol carries no
//! request identifiers to disambiguate interleaved replies.

use crate::error::{Error, Result};
use crate::meter_protocol as proto;
use std::io::{Read, Write};

fn hex_dump(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Synchronous client for a DL/T 645 energy meter.
///
/// Generic over the session so tests can substitute a scripted byte stream
/// for the serial port.
pub struct MeterClient<S: Read + Write> {
    session: S,
    station: [u8; 6],
}

impl<S: Read + Write> MeterClient<S> {
    /// Opens a client, discovering the station address with a broadcast
    /// read-address request.
    pub fn open(session: S) -> Result<Self> {
        let mut client = Self {
            session,
            station: proto::BROADCAST,
        };
        let reply = client.transact(proto::Frame::new(
            proto::BROADCAST,
            proto::CONTROL_READ_ADDRESS,
            Vec::new(),
        ))?;
        if reply.data.len() < 6 {
            return Err(Error::IncompleteResponse { address: 0 });
        }
        let mut station = [0u8; 6];
        station.copy_from_slice(&reply.data[..6]);
        log::info!("Meter station address: {}", hex_dump(&station));
        client.station = station;
        Ok(client)
    }

    /// Creates a client for an already-known station address, skipping
    /// discovery.
    pub fn with_station(session: S, station: [u8; 6]) -> Self {
        Self { session, station }
    }

    /// The station address this client talks to.
    pub fn station(&self) -> [u8; 6] {
        self.station
    }

    /// Reads a register and returns its raw 16-bit content.
    pub fn read_register_raw(&mut self, addr: u16) -> Result<u16> {
        let wire_addr = proto::wire_address(addr);
        let reply = self.transact(proto::Frame::new(
            self.station,
            proto::CONTROL_READ,
            proto::read_request_data(wire_addr),
        ))?;
        self.expect_control(&reply, proto::CONTROL_READ)?;
        proto::parse_read_response_data(&reply.data, wire_addr)
    }

    /// Reads a single register, applying the direct-scale multiplier for
    /// the addresses that carry one; every other register is returned as
    /// its raw value.
    pub fn read_single_register(&mut self, addr: u16) -> Result<f64> {
        let raw = self.read_register_raw(addr)?;
        let value = match proto::single_register_scale(addr) {
            Some(scale) => f64::from(raw) * scale,
            None => f64::from(raw),
        };
        log::debug!("Register {addr:#06X} = {raw:#06X} -> {value}");
        Ok(value)
    }

    /// Reads a register pair and combines it into one physical value.
    ///
    /// Fails with [`Error::UnknownRegisterPair`] before any I/O when the
    /// pair is not in the scale table.
    pub fn read_register_pair(&mut self, addr1: u16, addr2: u16) -> Result<f64> {
        let scale = proto::pair_scale(addr1, addr2)?;
        let main = self.read_register_raw(addr1)?;
        let lsb = self.read_register_raw(addr2)?;
        let value = proto::combine_pair(main, lsb, scale);
        log::debug!("Register pair ({addr1:#06X}, {addr2:#06X}) = {value}");
        Ok(value)
    }

    /// Writes a 16-bit value to a register. The echoed reply is consumed
    /// but its content is not validated.
    pub fn write_register(&mut self, addr: u16, value: u16) -> Result<()> {
        let wire_addr = proto::wire_address(addr);
        let _ = self.transact(proto::Frame::new(
            self.station,
            proto::CONTROL_WRITE,
            proto::write_request_data(wire_addr, value),
        ))?;
        log::debug!("Wrote {value:#06X} to register {addr:#06X}");
        Ok(())
    }

    fn expect_control(&self, reply: &proto::Frame, request: u8) -> Result<()> {
        let expected = request | proto::CONTROL_REPLY;
        if reply.control != expected {
            return Err(Error::UnexpectedControl {
                got: reply.control,
                expected,
            });
        }
        Ok(())
    }

    /// One blocking round trip: wake-up bytes, the request frame, then the
    /// reply read with exact lengths so nothing beyond one frame is
    /// consumed from the session.
    fn transact(&mut self, request: proto::Frame) -> Result<proto::Frame> {
        let mut wire = Vec::with_capacity(proto::WAKEUP.len() + 12 + request.data.len());
        wire.extend_from_slice(&proto::WAKEUP);
        wire.extend_from_slice(&request.encode());
        log::debug!("Meter frame sent: {}", hex_dump(&wire));
        self.session.write_all(&wire).map_err(map_io)?;
        self.session.flush().map_err(map_io)?;

        let frame = self.read_frame()?;
        Ok(frame)
    }

    fn read_frame(&mut self) -> Result<proto::Frame> {
        // Skip wake-up echoes and line noise until the start delimiter.
        let mut byte = [0u8; 1];
        let mut skipped = 0;
        loop {
            self.session.read_exact(&mut byte).map_err(map_io)?;
            if byte[0] == proto::FRAME_START {
                break;
            }
            skipped += 1;
            if skipped > 32 {
                return Err(Error::FrameSync);
            }
        }

        let mut frame = vec![proto::FRAME_START];
        // Station address, second delimiter, control and length.
        let mut head = [0u8; 9];
        self.session.read_exact(&mut head).map_err(map_io)?;
        frame.extend_from_slice(&head);
        let len = usize::from(head[8]);
        let mut rest = vec![0u8; len + 2];
        self.session.read_exact(&mut rest).map_err(map_io)?;
        frame.extend_from_slice(&rest);

        log::debug!("Meter frame received: {}", hex_dump(&frame));
        proto::Frame::decode(&frame)
    }
}

fn map_io(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::TimedOut {
        Error::Timeout
    } else {
        Error::Io(err)
    }
}
