//! Serial-port settings for the two device links.

use std::time::Duration;

/// Default baud rate of the supply link.
pub const SUPPLY_BAUD_RATE: u32 = 9600;
/// Default read timeout of the supply link.
pub const SUPPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Fixed baud rate of the meter link.
pub const METER_BAUD_RATE: u32 = 115_200;
/// Default read timeout of the meter link.
pub const METER_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens the supply link: 8 data bits, no parity, 1 stop bit.
pub fn supply_port(
    device: &str,
    baud_rate: u32,
    timeout: Duration,
) -> serialport::Result<Box<dyn serialport::SerialPort>> {
    serialport::new(device, baud_rate)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .data_bits(serialport::DataBits::Eight)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()
}

/// Opens the meter link: 8 data bits, even parity, 1 stop bit at
/// [`METER_BAUD_RATE`].
pub fn meter_port(
    device: &str,
    timeout: Duration,
) -> serialport::Result<Box<dyn serialport::SerialPort>> {
    serialport::new(device, METER_BAUD_RATE)
        .parity(serialport::Parity::Even)
        .stop_bits(serialport::StopBits::One)
        .data_bits(serialport::DataBits::Eight)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()
}
