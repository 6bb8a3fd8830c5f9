use crate::config::Config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use metercal_lib::calibration::Phase;
use metercal_lib::scale::PowerFactor;
use metercal_lib::serial;
use std::time::Duration;

fn default_supply_device() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM3")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn default_meter_device() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM10")
    } else {
        String::from("/dev/ttyUSB1")
    }
}

fn parse_register(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register address format: {e}"))
}

fn parse_register_value(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register value format: {e}"))
}

fn parse_phase(s: &str) -> Result<Phase, String> {
    match s.to_ascii_uppercase().as_str() {
        "R" => Ok(Phase::R),
        "Y" => Ok(Phase::Y),
        "B" => Ok(Phase::B),
        other => Err(format!("Unknown phase '{other}', expected R, Y or B")),
    }
}

fn parse_power_factor(s: &str) -> Result<PowerFactor, String> {
    // Unrecognized labels intentionally map to unity.
    Ok(PowerFactor::from_label(s))
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliConnection {
    /// Talk to the programmable power supply over its serial link.
    Supply {
        /// Serial port device name.
        /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
        #[arg(short, long, default_value_t = default_supply_device())]
        device: String,

        /// Baud rate for the supply link.
        #[arg(long, default_value_t = serial::SUPPLY_BAUD_RATE)]
        baud_rate: u32,

        /// Read timeout for the supply link.
        /// Examples: "1s", "500ms".
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        timeout: Duration,

        /// Supply-specific commands.
        #[command(subcommand)]
        command: SupplyCommands,
    },
    /// Talk to the energy meter over its DL/T 645 serial link.
    /// The line always runs 8 data bits, even parity, 1 stop bit at
    /// 115200 baud; the station address is discovered at open.
    #[clap(verbatim_doc_comment)]
    Meter {
        /// Serial port device name.
        /// Examples: "/dev/ttyUSB1" (Linux), "COM10" (Windows).
        #[arg(short, long, default_value_t = default_meter_device())]
        device: String,

        /// Read timeout for the meter link.
        #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
        timeout: Duration,

        /// Meter-specific commands.
        #[command(subcommand)]
        command: MeterCommands,
    },
    /// Run gain calibration cycles against the reference excitation.
    /// The excitation settings and the supply port come from the
    /// configuration file; pass --no-excitation when the supply is
    /// already running at the calibration point.
    #[clap(verbatim_doc_comment)]
    Calibrate {
        /// Configuration file holding the supply port and excitation
        /// settings.
        #[arg(long, default_value_t = Config::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,

        /// Meter serial port device name.
        #[arg(short, long, default_value_t = default_meter_device())]
        device: String,

        /// Read timeout for the meter link.
        #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
        timeout: Duration,

        /// Skip commanding the supply; assume the excitation is already
        /// applied.
        #[arg(long)]
        no_excitation: bool,

        /// Calibrate a single phase instead of all three.
        #[arg(long, value_parser = parse_phase)]
        phase: Option<Phase>,

        /// Which quantity to calibrate.
        #[command(subcommand)]
        quantity: CalibrateCommands,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum SupplyCommands {
    /// Set the output excitation: voltage, current and power factor on all
    /// three phases.
    SetOutput {
        /// Output voltage in volts, e.g. "220".
        voltage: f64,
        /// Output current in amps, e.g. "2".
        current: f64,
        /// Power factor label: 1.0, 0.5L, 0.5C, 0.8C or 0.8L.
        /// Anything else selects unity.
        #[arg(default_value = "1.0", value_parser = parse_power_factor, verbatim_doc_comment)]
        power_factor: PowerFactor,
    },

    /// Drive every output field to zero.
    Reset,

    /// Read back the presently applied output per phase.
    Poll,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum MeterCommands {
    /// Print the station address discovered on the bus.
    QueryAddress,

    /// Read a register pair and print the combined physical value.
    /// Addresses can be decimal or hexadecimal (e.g. "0xD9 0xE9").
    #[clap(verbatim_doc_comment)]
    ReadPair {
        /// Main register address.
        #[arg(value_parser = parse_register)]
        addr1: u16,
        /// LSB extension register address.
        #[arg(value_parser = parse_register)]
        addr2: u16,
    },

    /// Read a single register; direct-scale registers print the physical
    /// value, everything else the raw content.
    #[clap(verbatim_doc_comment)]
    ReadRegister {
        /// Register address, decimal or hexadecimal.
        #[arg(value_parser = parse_register)]
        addr: u16,
    },

    /// Write a 16-bit value to a register.
    /// **Warning:** gain registers directly trim the meter's readings.
    #[clap(verbatim_doc_comment)]
    WriteRegister {
        /// Register address, decimal or hexadecimal.
        #[arg(value_parser = parse_register)]
        addr: u16,
        /// Value to write, decimal or hexadecimal (e.g. "0x8000").
        #[arg(value_parser = parse_register_value)]
        value: u16,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
pub enum CalibrateCommands {
    /// Calibrate the voltage channels against the 220 V reference.
    Voltage,
    /// Calibrate the current channels against the 3 A reference.
    Current,
    /// Calibrate the active-power channels against the 440 W reference.
    Power,
    /// Calibrate the phase-angle channels against the 60° reference.
    PhaseAngle,
    /// Calibrate voltage, current, power and phase-angle in sequence.
    All,
}

const fn about_text() -> &'static str {
    "Three-phase energy meter calibration CLI - drive a reference power supply and trim DL/T 645 meter gain registers."
}

#[derive(Parser, Debug)]
#[command(name="metercal", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is off.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Specifies the device link and its commands.
    #[command(subcommand)]
    pub connection: CliConnection,
}
