//! Fixed-size payload structures that follow the [`PacketHeader`](crate::PacketHeader).
//!
//! Some payloads are followed by a variable-length tail (script text, user input, event
//! definitions) whose length is carried inside the fixed part.

use {
    core::mem::size_of,
    zerocopy::{
        byteorder::little_endian::{U32, U64},
        FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    },
};

/// The longest x86 instruction.
pub const MAXIMUM_INSTR_SIZE: usize = 16;

/// Sent by the operating core when it takes over the conversation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct PausedPacket {
    pub rip: U64,
    pub reason: U32,
    pub core: U32,
    pub event_tag: U64,
    pub instruction_len: U32,
    pub instruction_bytes: [u8; MAXIMUM_INSTR_SIZE],
}

/// Request and result of [`Action::ChangeCore`](crate::Action::ChangeCore).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct ChangeCorePacket {
    pub new_core: U32,
    pub result: U32,
}

impl ChangeCorePacket {
    pub fn new(new_core: u32) -> Self {
        Self {
            new_core: U32::new(new_core),
            result: U32::new(0),
        }
    }
}

/// Request and result of [`Action::FlushBuffers`](crate::Action::FlushBuffers).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct FlushPacket {
    pub vmx_root_flushed: U32,
    pub vmx_non_root_flushed: U32,
    pub result: U32,
}

/// Request and result of [`Action::ReadRegisters`](crate::Action::ReadRegisters).
///
/// For [`ALL_REGISTERS`](crate::ALL_REGISTERS) the reply carries the
/// [`RegisterBlock`](crate::RegisterBlock) right after this structure.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct RegisterReadPacket {
    pub register_id: U32,
    pub value: U64,
    pub result: U32,
}

impl RegisterReadPacket {
    pub fn new(register_id: u32) -> Self {
        Self {
            register_id: U32::new(register_id),
            value: U64::new(0),
            result: U32::new(0),
        }
    }
}

/// What a [`ChangeProcessPacket`] asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChangeProcessAction {
    /// Report the current process identifier.
    Query = 0,

    /// Switch to the address space of `process_id`.
    Switch = 1,
}

impl ChangeProcessAction {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ChangeProcessAction::Query),
            1 => Some(ChangeProcessAction::Switch),
            _ => None,
        }
    }
}

/// Request and result of [`Action::ChangeProcess`](crate::Action::ChangeProcess).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct ChangeProcessPacket {
    pub action: U32,
    pub process_id: U32,
    pub result: U32,
}

impl ChangeProcessPacket {
    pub fn new(action: u32, process_id: u32) -> Self {
        Self {
            action: U32::new(action),
            process_id: U32::new(process_id),
            result: U32::new(0),
        }
    }
}

/// Fixed part of every packet that carries a variable-length tail: scripts, user input,
/// event registrations and event actions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct BufferPacket {
    pub length: U32,
    pub result: U32,
}

impl BufferPacket {
    pub fn new(length: u32) -> Self {
        Self {
            length: U32::new(length),
            result: U32::new(0),
        }
    }

    /// Parses the fixed part and returns it with its tail. Fails when the tail is shorter
    /// than the advertised length.
    pub fn parse(bytes: &[u8]) -> Option<(Self, &[u8])> {
        let (packet, rest) = Self::read_from_prefix(bytes).ok()?;
        let tail = rest.get(..packet.length.get() as usize)?;
        Some((packet, tail))
    }
}

/// Operation requested by a [`ModifyEventPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ModifyEventAction {
    Query = 0,
    Enable = 1,
    Disable = 2,
    Clear = 3,
}

impl ModifyEventAction {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ModifyEventAction::Query),
            1 => Some(ModifyEventAction::Enable),
            2 => Some(ModifyEventAction::Disable),
            3 => Some(ModifyEventAction::Clear),
            _ => None,
        }
    }
}

/// Request and result of [`Action::QueryAndModifyEvent`](crate::Action::QueryAndModifyEvent).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct ModifyEventPacket {
    pub tag: U64,
    pub action: U32,
    /// Non-zero when the event is enabled.
    pub is_enabled: u8,
    pub result: U32,
}

impl ModifyEventPacket {
    pub fn new(tag: u64, action: u32) -> Self {
        Self {
            tag: U64::new(tag),
            action: U32::new(action),
            is_enabled: 0,
            result: U32::new(0),
        }
    }
}

static_assertions::const_assert_eq!(size_of::<PausedPacket>(), 44);
static_assertions::const_assert_eq!(size_of::<ChangeCorePacket>(), 8);
static_assertions::const_assert_eq!(size_of::<FlushPacket>(), 12);
static_assertions::const_assert_eq!(size_of::<RegisterReadPacket>(), 16);
static_assertions::const_assert_eq!(size_of::<ChangeProcessPacket>(), 12);
static_assertions::const_assert_eq!(size_of::<BufferPacket>(), 8);
static_assertions::const_assert_eq!(size_of::<ModifyEventPacket>(), 17);
