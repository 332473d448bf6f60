//! The module containing various constants that may be modified by developers.

/// The logging level.
pub const LOGGING_LEVEL: log::LevelFilter = log::LevelFilter::Debug;

/// The COM port used for local diagnostics through the UART logger.
pub const LOGGER_COM_PORT: u16 = 0x3f8;

/// The COM port carrying the debugger protocol.
pub const DEBUGGER_COM_PORT: u16 = 0x2f8;
