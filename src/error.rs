//! Error types shared by the protocol codecs, the device clients and the
//! calibration engine.

/// Represents all possible errors that can occur while talking to the power
/// supply or the meter, or while deriving calibration gains.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // --- transport ---
    /// Underlying serial I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// No response arrived within the session read timeout.
    #[error("Response timed out")]
    Timeout,

    // --- protocol ---
    /// A received buffer is shorter than the fixed offsets require.
    #[error("Frame too short: got {got} bytes, need at least {need}")]
    ShortFrame { got: usize, need: usize },

    /// No frame start delimiter was found in the received bytes.
    #[error("Cannot synchronize to frame start")]
    FrameSync,

    /// The frame checksum does not match its contents.
    #[error("Frame checksum mismatch: got {got:#04X}, computed {computed:#04X}")]
    BadChecksum { got: u8, computed: u8 },

    /// The response carries a control code the request did not ask for.
    #[error("Unexpected control code {got:#04X}, expected {expected:#04X}")]
    UnexpectedControl { got: u8, expected: u8 },

    /// The response data domain holds fewer register bytes than required.
    #[error("Incomplete register data for address {address:#06X}")]
    IncompleteResponse { address: u16 },

    /// The register pair is not present in the scale table.
    #[error("Unknown register pair ({0:#06X}, {1:#06X})")]
    UnknownRegisterPair(u16, u16),

    /// The register pair belongs to neither the voltage nor the current
    /// address set.
    #[error("No valid calibration addresses ({0:#06X}, {1:#06X})")]
    NoValidAddress(u16, u16),

    // --- arithmetic ---
    /// A gain computation would divide by a measured value of zero.
    #[error("Division by zero measured value")]
    DivisionByZero,

    /// A physical value cannot be represented as a 16-bit scaled word.
    #[error("Value {0} out of range for fixed-point encoding")]
    ValueOutOfRange(f64),

    /// A computed gain does not fit a 16-bit register.
    #[error("Computed gain {0} out of range for a 16-bit register")]
    GainOutOfRange(f64),
}

/// The result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;
