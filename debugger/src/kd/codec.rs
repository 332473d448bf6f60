//! Framing, validation and transmission of protocol packets.
//!
//! Received bytes accumulate in a [`ReceiveBuffer`] until the terminator shows up. Outgoing
//! packets are written piecewise (header, payload, tail, terminator) while holding the
//! transport lock, which doubles as the global response lock.

use {
    super::{platform::{Platform, Transport}, Debugger},
    crate::{error::DebuggerError, global_const::MAX_PACKET_SIZE},
    alloc::vec::Vec,
    core::hint::spin_loop,
    log::*,
    shared::{Action, PacketHeader, PacketType, INDICATOR, TERMINATOR},
    zerocopy::{FromBytes, IntoBytes},
};

/// Bounded buffer that frames the incoming byte stream.
pub struct ReceiveBuffer {
    data: Vec<u8>,
    len: usize,
}

impl ReceiveBuffer {
    /// Allocates the buffer once. This is the only allocation on the receive path.
    pub fn new() -> Result<Self, DebuggerError> {
        let mut data = Vec::new();
        data.try_reserve_exact(MAX_PACKET_SIZE)
            .map_err(|_| DebuggerError::ReceiveBufferAllocationFailed)?;
        data.resize(MAX_PACKET_SIZE, 0);
        Ok(Self { data, len: 0 })
    }

    /// Appends one byte. Returns the length of the framed message, terminator stripped,
    /// once the terminator has been received.
    pub fn push(&mut self, byte: u8) -> Result<Option<usize>, DebuggerError> {
        if self.len == self.data.len() {
            self.len = 0;
            return Err(DebuggerError::ReceiveBufferOverflow);
        }

        self.data[self.len] = byte;
        self.len += 1;

        if self.len >= TERMINATOR.len() && self.data[self.len - TERMINATOR.len()..self.len] == TERMINATOR {
            let framed = self.len - TERMINATOR.len();
            self.len = 0;
            return Ok(Some(framed));
        }

        Ok(None)
    }

    /// The first `len` bytes of the last framed message.
    pub fn frame(&self, len: usize) -> &[u8] {
        &self.data[..len]
    }

    pub fn discard(&mut self) {
        self.len = 0;
    }
}

/// Validates a framed message from the debugger and splits it into header and payload.
pub fn decode_packet(frame: &[u8]) -> Result<(PacketHeader, &[u8]), DebuggerError> {
    let (header, payload) = PacketHeader::read_from_prefix(frame).map_err(|_| DebuggerError::TruncatedPacket)?;
    if header.indicator.get() != INDICATOR {
        return Err(DebuggerError::InvalidIndicator(header.indicator.get()));
    }

    let expected = header.compute_checksum(&[payload]);
    if expected != header.checksum {
        return Err(DebuggerError::ChecksumMismatch {
            expected,
            found: header.checksum,
        });
    }

    let packet_type = header.packet_type.get();
    if PacketType::from_u32(packet_type) != Some(PacketType::DebuggerToDebuggeeVmxRoot) {
        return Err(DebuggerError::UnexpectedPacketType(packet_type));
    }

    Ok((header, payload))
}

/// Writes one complete packet, terminator included, to `transport`.
pub fn write_packet<T: Transport>(transport: &mut T, packet_type: PacketType, action: Action, payload: &[u8], tail: &[u8]) {
    let mut header = PacketHeader::new(packet_type, action);
    header.checksum = header.compute_checksum(&[payload, tail]);

    transport.send(header.as_bytes());
    if !payload.is_empty() {
        transport.send(payload);
    }
    if !tail.is_empty() {
        transport.send(tail);
    }
    transport.send(&TERMINATOR);
}

impl<P: Platform, T: Transport> Debugger<P, T> {
    /// Blocks until one framed message has been received into `buffer`. Returns its length.
    pub(crate) fn receive_frame(&self, buffer: &mut ReceiveBuffer) -> Result<usize, DebuggerError> {
        loop {
            // Take the transport lock per byte so responses from other cores are not held
            // off while nothing arrives.
            let byte = self.transport.lock().receive_byte();
            let Some(byte) = byte else {
                spin_loop();
                continue;
            };

            if let Some(len) = buffer.push(byte)? {
                return Ok(len);
            }
        }
    }

    /// Sends a packet to the debugger under the global response lock.
    ///
    /// A pending suppression directive is cleared when `action` is the awaited response.
    pub fn send_response(&self, action: Action, payload: &[u8], tail: &[u8]) {
        {
            let mut transport = self.transport.lock();
            write_packet(&mut *transport, PacketType::DebuggeeToDebugger, action, payload, tail);
        }

        if self.suppression.clear_if(action) {
            debug!("Suppression lifted by {:?}", action);
        }
    }

    /// Forwards a log message to the debugger.
    pub fn send_log_message(&self, message: &str) {
        self.send_response(Action::LoggingMechanism, message.as_bytes(), &[]);
    }

    /// Tells the debugger that the debuggee is up.
    pub fn announce_started(&self) {
        trace!("Announcing debuggee start");
        self.send_response(Action::Started, &[], &[]);
    }
}
