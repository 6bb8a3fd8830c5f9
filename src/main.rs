//! Three-phase energy meter calibration CLI
//!
//! A command-line interface (CLI) application for calibrating DL/T 645
//! three-phase energy meters against a programmable power-supply reference
//! source, over two independent serial links.
//!
//! This tool allows users to:
//! - Command the supply's reference excitation (voltage, current, power
//!   factor) and read back its applied output.
//! - Read meter register pairs and single registers, and write gain
//!   registers directly.
//! - Run the gain calibration cycles for voltage, current, active power and
//!   phase-angle, per phase or for all three phases, with bounded
//!   user-confirmed retries.
//!
//! The CLI leverages the `metercal_lib` crate for the protocol codecs, the
//! device clients and the calibration engine.

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use metercal_lib::{
    calibration::{CalibrationOutcome, Calibrator, Phase},
    meter_client::MeterClient,
    scale::PowerFactor,
    serial,
    supply_client::SupplyClient,
    supply_protocol::OutputReading,
};
use std::io::{Read, Write};
use std::panic;
use std::time::Duration;

mod commandline;
mod config;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0)); // Provide defaults

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic", // Optional target for filtering
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Bound on the recalibrate-and-confirm loop for one target.
const MAX_CALIBRATION_ATTEMPTS: usize = 3;

/// Settle time between commanding the excitation and the first meter read.
const EXCITATION_SETTLE: Duration = Duration::from_secs(2);

fn print_output_reading(reading: &OutputReading) {
    for (name, index) in [("R", 0), ("Y", 1), ("B", 2)] {
        println!(
            "Phase {name}: {:.4} V, {:.6} A",
            reading.voltage[index], reading.current[index]
        );
    }
    match reading.power_factor {
        Some(pf) => println!("Load angle: {:.2}° ({pf})", reading.angle),
        None => println!("Load angle: {:.2}° (outside all known bands)", reading.angle),
    }
}

fn print_outcome(label: &str, phase: Phase, outcome: &CalibrationOutcome) {
    println!(
        "{label} phase {phase}: gain {:#06X} -> {:#06X}, measured {:.4}, now reading {:.4}",
        outcome.previous_gain, outcome.new_gain, outcome.measured, outcome.verified
    );
}

fn handle_supply(args: &commandline::CliConnection) -> Result<()> {
    let commandline::CliConnection::Supply {
        device,
        baud_rate,
        timeout,
        command,
    } = args
    else {
        unreachable!("handle_supply called for a supply connection only");
    };

    info!("Connecting to power supply on {device} at {baud_rate} baud...");
    let port = serial::supply_port(device, *baud_rate, *timeout)
        .with_context(|| format!("Cannot open supply serial port {device}"))?;
    let mut client = SupplyClient::new(port);

    match command {
        commandline::SupplyCommands::SetOutput {
            voltage,
            current,
            power_factor,
        } => {
            info!("Executing: Set Output {voltage} V, {current} A, PF {power_factor}");
            client
                .set_output(*voltage, *current, *power_factor)
                .with_context(|| "Cannot set supply output")?;
            println!("Output set to {voltage} V, {current} A, power factor {power_factor}.");
        }
        commandline::SupplyCommands::Reset => {
            info!("Executing: Reset Output");
            client
                .reset_output()
                .with_context(|| "Cannot reset supply output")?;
            println!("Supply output reset to zero.");
        }
        commandline::SupplyCommands::Poll => {
            info!("Executing: Poll Output");
            let reading = client
                .poll_output()
                .with_context(|| "Cannot poll supply output")?;
            print_output_reading(&reading);
        }
    }
    Ok(())
}

fn open_meter(device: &str, timeout: Duration) -> Result<MeterClient<Box<dyn serialport::SerialPort>>> {
    info!("Connecting to meter on {device}...");
    let port = serial::meter_port(device, timeout)
        .with_context(|| format!("Cannot open meter serial port {device}"))?;
    MeterClient::open(port).with_context(|| "Cannot discover meter station address")
}

fn handle_meter(args: &commandline::CliConnection) -> Result<()> {
    let commandline::CliConnection::Meter {
        device,
        timeout,
        command,
    } = args
    else {
        unreachable!("handle_meter called for a meter connection only");
    };

    let mut client = open_meter(device, *timeout)?;

    match command {
        commandline::MeterCommands::QueryAddress => {
            info!("Executing: Query Station Address");
            let station = client.station();
            let rendered: Vec<String> = station.iter().map(|b| format!("{b:02X}")).collect();
            println!("Station address: {}", rendered.join(" "));
        }
        commandline::MeterCommands::ReadPair { addr1, addr2 } => {
            info!("Executing: Read Register Pair ({addr1:#06X}, {addr2:#06X})");
            let value = client
                .read_register_pair(*addr1, *addr2)
                .with_context(|| format!("Cannot read register pair ({addr1:#06X}, {addr2:#06X})"))?;
            println!("({addr1:#06X}, {addr2:#06X}) = {value}");
        }
        commandline::MeterCommands::ReadRegister { addr } => {
            info!("Executing: Read Register {addr:#06X}");
            let value = client
                .read_single_register(*addr)
                .with_context(|| format!("Cannot read register {addr:#06X}"))?;
            println!("{addr:#06X} = {value}");
        }
        commandline::MeterCommands::WriteRegister { addr, value } => {
            info!("Executing: Write Register {addr:#06X} = {value:#06X}");
            println!(
                "WARNING: Writing meter registers changes calibration state directly.\n\
                 Register {addr:#06X} will be set to {value:#06X}."
            );
            if !Confirm::new()
                .with_prompt("Do you want to continue?")
                .default(false)
                .show_default(true)
                .interact()?
            {
                info!("Register write aborted by user.");
                return Ok(());
            }
            client
                .write_register(*addr, *value)
                .with_context(|| format!("Cannot write register {addr:#06X}"))?;
            println!("Register {addr:#06X} set to {value:#06X} successfully.");
        }
    }
    Ok(())
}

/// Runs one calibration target with the bounded recalibrate-and-confirm
/// loop that replaces the historical recurse-on-input flow.
fn run_target<S: Read + Write>(
    meter: &mut MeterClient<S>,
    quantity: commandline::CalibrateCommands,
    phase: Phase,
) -> Result<()> {
    for attempt in 1..=MAX_CALIBRATION_ATTEMPTS {
        let mut calibrator = Calibrator::new(meter);
        let (label, outcome) = match quantity {
            commandline::CalibrateCommands::Voltage => {
                ("Voltage", calibrator.calibrate_voltage(phase)?)
            }
            commandline::CalibrateCommands::Current => {
                ("Current", calibrator.calibrate_current(phase)?)
            }
            commandline::CalibrateCommands::Power => ("Power", calibrator.calibrate_power(phase)?),
            commandline::CalibrateCommands::PhaseAngle => {
                ("Phase angle", calibrator.calibrate_phase_angle(phase)?)
            }
            commandline::CalibrateCommands::All => {
                unreachable!("All is expanded before run_target")
            }
        };
        print_outcome(label, phase, &outcome);

        if attempt == MAX_CALIBRATION_ATTEMPTS {
            warn!("{label} phase {phase}: attempt limit reached");
            break;
        }
        if !Confirm::new()
            .with_prompt("Run this target again?")
            .default(false)
            .show_default(true)
            .interact()?
        {
            break;
        }
        info!("{label} phase {phase}: recalibrating (attempt {})", attempt + 1);
    }
    Ok(())
}

fn handle_calibrate(args: &commandline::CliConnection) -> Result<()> {
    let commandline::CliConnection::Calibrate {
        config_file,
        device,
        timeout,
        no_excitation,
        phase,
        quantity,
    } = args
    else {
        unreachable!("handle_calibrate called for a calibrate connection only");
    };

    if !no_excitation {
        let config = config::Config::load(config_file)?;
        info!(
            "Connecting to power supply on {} at {} baud...",
            config.serial.port, config.serial.baudrate
        );
        let port = serial::supply_port(
            &config.serial.port,
            config.serial.baudrate,
            config.serial.timeout,
        )
        .with_context(|| format!("Cannot open supply serial port {}", config.serial.port))?;
        let mut supply = SupplyClient::new(port);
        supply
            .set_output(
                config.settings.voltage,
                config.settings.current,
                PowerFactor::from_label(&config.settings.power_factor),
            )
            .with_context(|| "Cannot set reference excitation")?;
        println!(
            "Reference excitation applied: {} V, {} A, power factor {}.",
            config.settings.voltage, config.settings.current, config.settings.power_factor
        );
        std::thread::sleep(EXCITATION_SETTLE);
    } else {
        info!("Skipping excitation; assuming the supply is already at the calibration point");
    }

    let mut meter = open_meter(device, *timeout)?;

    let phases: Vec<Phase> = match phase {
        Some(single) => vec![*single],
        None => Phase::ALL.to_vec(),
    };
    let quantities: Vec<commandline::CalibrateCommands> = match quantity {
        commandline::CalibrateCommands::All => vec![
            commandline::CalibrateCommands::Voltage,
            commandline::CalibrateCommands::Current,
            commandline::CalibrateCommands::Power,
            commandline::CalibrateCommands::PhaseAngle,
        ],
        single => vec![*single],
    };

    for quantity in quantities {
        for &phase in &phases {
            run_target(&mut meter, quantity, phase)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "metercal CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    match &args.connection {
        supply @ commandline::CliConnection::Supply { .. } => handle_supply(supply),
        meter @ commandline::CliConnection::Meter { .. } => handle_meter(meter),
        calibrate @ commandline::CliConnection::Calibrate { .. } => handle_calibrate(calibrate),
    }
}
