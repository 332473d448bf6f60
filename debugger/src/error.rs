use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerError {
    #[error("No logical processor reported by the platform")]
    NoProcessors,

    #[error("Processor count {0} exceeds the supported maximum")]
    TooManyProcessors(usize),

    #[error("Failed to allocate the packet receive buffer")]
    ReceiveBufferAllocationFailed,

    #[error("Failed to allocate the deferred call descriptors")]
    DeferredCallAllocationFailed,

    #[error("Receive buffer overflow, packet discarded")]
    ReceiveBufferOverflow,

    #[error("Packet is shorter than its header")]
    TruncatedPacket,

    #[error("Invalid packet indicator {0:#x}")]
    InvalidIndicator(u64),

    #[error("Packet checksum mismatch: expected {expected:#x}, found {found:#x}")]
    ChecksumMismatch { expected: u8, found: u8 },

    #[error("Unexpected packet type {0:#x}")]
    UnexpectedPacketType(u32),

    #[error("Unknown VMCALL command")]
    UnknownVmcallCommand,
}
