//! 16550 UART access shared by the logger and the debugger transport.

use {
    crate::{
        intel::support::{inb, outb},
        kd::platform::Transport,
    },
    core::{fmt, fmt::Write},
};

const UART_OFFSET_DATA: u16 = 0;
const UART_OFFSET_INTERRUPT_ENABLE: u16 = 1;
const UART_OFFSET_FIFO_CONTROL: u16 = 2;
const UART_OFFSET_LINE_CONTROL: u16 = 3;
const UART_OFFSET_MODEM_CONTROL: u16 = 4;
const UART_OFFSET_LINE_STATUS: u16 = 5;

const LINE_STATUS_DATA_READY: u8 = 0x01;
const LINE_STATUS_TRANSMITTER_EMPTY: u8 = 0x20;

/// Divisor for 115200 baud.
const BAUD_DIVISOR: u16 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPort {
    io_port_base: u16,
}

impl SerialPort {
    pub const fn new(io_port_base: u16) -> Self {
        Self { io_port_base }
    }

    /// Programs the port for 115200 baud, 8N1, FIFOs enabled, no interrupts.
    pub fn init(&self) {
        outb(self.io_port_base + UART_OFFSET_INTERRUPT_ENABLE, 0x00);
        outb(self.io_port_base + UART_OFFSET_LINE_CONTROL, 0x80);
        outb(self.io_port_base + UART_OFFSET_DATA, BAUD_DIVISOR as u8);
        outb(self.io_port_base + UART_OFFSET_INTERRUPT_ENABLE, (BAUD_DIVISOR >> 8) as u8);
        outb(self.io_port_base + UART_OFFSET_LINE_CONTROL, 0x03);
        outb(self.io_port_base + UART_OFFSET_FIFO_CONTROL, 0xC7);
        outb(self.io_port_base + UART_OFFSET_MODEM_CONTROL, 0x03);
    }

    pub fn write_byte(&self, byte: u8) {
        while (inb(self.io_port_base + UART_OFFSET_LINE_STATUS) & LINE_STATUS_TRANSMITTER_EMPTY) == 0 {}
        outb(self.io_port_base + UART_OFFSET_DATA, byte);
    }

    pub fn try_read_byte(&self) -> Option<u8> {
        if inb(self.io_port_base + UART_OFFSET_LINE_STATUS) & LINE_STATUS_DATA_READY == 0 {
            return None;
        }
        Some(inb(self.io_port_base + UART_OFFSET_DATA))
    }
}

impl Write for SerialPort {
    // Writes bytes `string` to the serial port.
    fn write_str(&mut self, string: &str) -> Result<(), fmt::Error> {
        for byte in string.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Carries the debugger protocol over a serial port.
pub struct SerialTransport {
    port: SerialPort,
}

impl SerialTransport {
    pub fn new(io_port_base: u16) -> Self {
        let port = SerialPort::new(io_port_base);
        port.init();
        Self { port }
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.port.write_byte(*byte);
        }
    }

    fn receive_byte(&mut self) -> Option<u8> {
        self.port.try_read_byte()
    }
}
