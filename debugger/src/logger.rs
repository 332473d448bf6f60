//! The module containing the UART (serial port) logger implementation.
// Inspired by:
// https://github.com/iankronquist/rustyvisor/blob/83b53ac104d85073858ba83326a28a6e08d1af12/pcuart/src/lib.rs
// Credits: https://github.com/tandasat/Hello-VT-rp/blob/main/hypervisor/src/logger.rs

use {
    crate::{config::LOGGER_COM_PORT, intel::serial::SerialPort},
    core::fmt::Write,
    spin::Mutex,
};

/// Initializes the logger instance.
///
/// Returns `false` if another logger was installed first; that logger stays in place.
pub fn init_uart_logger(level: log::LevelFilter) -> bool {
    UART_LOGGER.lock().init();
    install_logger(&UART_LOGGER, level)
}

fn install_logger(logger: &'static dyn log::Log, level: log::LevelFilter) -> bool {
    match log::set_logger(logger) {
        Ok(()) => {
            log::set_max_level(level);
            true
        }
        Err(error) => {
            log::debug!("Logger already installed, keeping it: {}", error);
            false
        }
    }
}

struct UartLogger {
    port: Mutex<SerialPort>,
}

impl UartLogger {
    const fn new(io_port_base: u16) -> Self {
        Self {
            port: Mutex::new(SerialPort::new(io_port_base)),
        }
    }

    fn lock(&self) -> spin::MutexGuard<'_, SerialPort> {
        self.port.lock()
    }
}

impl log::Log for UartLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(self.lock(), "{}: {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static UART_LOGGER: UartLogger = UartLogger::new(LOGGER_COM_PORT);
