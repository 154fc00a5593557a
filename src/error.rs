use thiserror::Error;

/// Errors raised by the coordination engine.
///
/// Only configuration problems caught at startup and simulator transport
/// failures surface here; safety rejections (unsafe mode switches, refused
/// lane changes, blocked merges) are reported in-band and retried.
#[derive(Debug, Error)]
pub enum Error {
    /// A configured vehicle class is unknown to the simulator.
    #[error("vehicle class '{0}' is not registered with the simulator")]
    UnknownClass(String),

    /// A registered class matches a platooning selector but has no mode mapping.
    #[error("class '{0}' matches a platooning selector but has no mode mapping")]
    UnmappedClass(String),

    /// A mode-mapped class has a different length than its base class.
    #[error("length of class '{mapped}' ({mapped_value}m) does not equal length of class '{original}' ({original_value}m)")]
    ClassLengthMismatch {
        original: String,
        mapped: String,
        original_value: f64,
        mapped_value: f64,
    },

    /// A mode-mapped class has a different emergency deceleration than its base class.
    #[error("emergency deceleration of class '{mapped}' ({mapped_value}) does not equal that of class '{original}' ({original_value})")]
    ClassDecelMismatch {
        original: String,
        mapped: String,
        original_value: f64,
        mapped_value: f64,
    },

    /// No registered vehicle class matches any platooning selector.
    #[error("no registered vehicle class matches a platooning selector")]
    NoPlatoonClass,

    /// The simulator found no route between the configured corridor edges.
    #[error("no route between '{from}' and '{to}'")]
    NoCorridor { from: String, to: String },

    /// The parameter set fails validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The exchange with the simulator failed.
    #[error("simulator: {0}")]
    Simulator(String),
}
