//! A library for calibrating DL/T 645 three-phase energy meters against a
//! programmable power-supply reference source.
//!
//! Two independent serial links are driven, each by its own client:
//!
//! 1. **Power supply** ([`supply_client::SupplyClient`]): a proprietary
//!    fixed-layout binary frame protocol that sets the reference excitation
//!    (voltage, current, power factor) and reads back the applied output.
//! 2. **Meter** ([`meter_client::MeterClient`]): DL/T 645 framing carrying
//!    16-bit register reads and writes, from which measurements and gain
//!    coefficients are accessed.
//!
//! On top of the meter client, [`calibration::Calibrator`] runs the
//! read-modify-write gain correction cycles for voltage, current, power and
//! phase-angle, one phase at a time.
//!
//! Both clients are generic over `std::io::Read + std::io::Write`, so any
//! byte stream with a read timeout works as a session; the [`serial`]
//! module (feature `serial`) opens real ports with the correct line
//! settings.
//!
//! ## Quick Start
//!
//! ```no_run
//! use metercal_lib::calibration::{Calibrator, Phase};
//! use metercal_lib::meter_client::MeterClient;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = metercal_lib::serial::meter_port(
//!         "/dev/ttyUSB1",
//!         metercal_lib::serial::METER_TIMEOUT,
//!     )?;
//!     let mut meter = MeterClient::open(port)?;
//!
//!     let outcome = Calibrator::new(&mut meter).calibrate_voltage(Phase::R)?;
//!     println!(
//!         "Voltage R: gain {} -> {}, now reading {:.3} V",
//!         outcome.previous_gain, outcome.new_gain, outcome.verified
//!     );
//!     Ok(())
//! }
//! ```

pub mod calibration;
pub mod error;
pub mod meter_client;
pub mod meter_protocol;
pub mod scale;
pub mod supply_client;
pub mod supply_protocol;

#[cfg_attr(docsrs, doc(cfg(feature = "serial")))]
#[cfg(feature = "serial")]
pub mod serial;

#[cfg(test)]
mod mock_serial;
