//! Wire protocol shared between the remote debugger and the debugger core that lives
//! inside the hypervisor.
//!
//! Every message starts with a [`PacketHeader`]. Payload layouts live in [`payload`].
//! Every structure is `#[repr(C)]` over byte-order aware integers with an alignment of one,
//! so its in-memory layout is the packed little-endian wire layout.

#![cfg_attr(not(test), no_std)]

pub mod payload;

use {
    core::mem::size_of,
    zerocopy::{
        byteorder::little_endian::{U32, U64},
        FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    },
};

/// Magic value identifying the protocol ("HYPERDBG").
pub const INDICATOR: u64 = 0x4859_5045_5244_4247;

/// Sequence that marks the end of every message on the raw byte stream.
pub const TERMINATOR: [u8; 4] = [0x00, 0x80, 0xEE, 0xFF];

/// Size of the serialized [`PacketHeader`].
pub const HEADER_SIZE: usize = size_of::<PacketHeader>();
static_assertions::const_assert_eq!(HEADER_SIZE, 17);

/// Event tag that selects every registered event.
pub const ALL_EVENTS_TAG: u64 = u64::MAX;

/// Register identifier requesting the full register block.
pub const ALL_REGISTERS: u32 = 0xFFFF_FFFF;

/// Direction/class of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketType {
    /// Command to be executed by the operating core in VMX root.
    DebuggerToDebuggeeVmxRoot = 1,

    /// Command to be executed by the user-mode part of the debuggee.
    DebuggerToDebuggeeUserMode = 2,

    /// Response or log message going back to the debugger.
    DebuggeeToDebugger = 3,
}

impl PacketType {
    /// Converts a `u32` value to a `PacketType` enum variant.
    pub fn from_u32(value: u32) -> Option<PacketType> {
        match value {
            1 => Some(PacketType::DebuggerToDebuggeeVmxRoot),
            2 => Some(PacketType::DebuggerToDebuggeeUserMode),
            3 => Some(PacketType::DebuggeeToDebugger),
            _ => None,
        }
    }
}

/// Requested action of a packet.
///
/// Values below `0x100` travel from the debugger to the debuggee, the rest travel back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Action {
    /// Execute one instruction on the operating core.
    Step = 1,

    /// Resume every core.
    Continue = 2,

    /// Tear the debuggee down and resume.
    CloseAndUnload = 3,

    /// Hand the conversation to another core.
    ChangeCore = 4,

    /// Flush the pending log buffers.
    FlushBuffers = 5,

    /// Query the current process or switch to another one.
    ChangeProcess = 6,

    /// Read one register or the whole register block.
    ReadRegisters = 7,

    /// Evaluate a script in the halted context.
    RunScript = 8,

    /// Forward a command line to the user-mode part of the debuggee.
    UserInput = 9,

    /// Register a new event.
    RegisterEvent = 10,

    /// Attach an action to an existing event.
    AddActionToEvent = 11,

    /// Query, enable, disable or clear events.
    QueryAndModifyEvent = 12,

    /// The debuggee is connected and running.
    Started = 0x100,

    /// A log message.
    LoggingMechanism = 0x101,

    /// A core halted and now owns the conversation.
    Paused = 0x102,

    /// Result of [`Action::ChangeCore`].
    ResultOfChangingCore = 0x103,

    /// Result of [`Action::ChangeProcess`].
    ResultOfChangingProcess = 0x104,

    /// Result of [`Action::FlushBuffers`].
    ResultOfFlush = 0x105,

    /// Result of [`Action::ReadRegisters`].
    ResultOfReadingRegisters = 0x106,

    /// Result of [`Action::RunScript`].
    ResultOfRunningScript = 0x107,

    /// Result of [`Action::RegisterEvent`].
    ResultOfRegisteringEvent = 0x108,

    /// Result of [`Action::AddActionToEvent`].
    ResultOfAddingActionToEvent = 0x109,

    /// Result of [`Action::QueryAndModifyEvent`].
    ResultOfQueryAndModifyEvent = 0x10A,
}

impl Action {
    /// Converts a `u32` value to an `Action` enum variant.
    pub fn from_u32(value: u32) -> Option<Action> {
        let action = match value {
            1 => Action::Step,
            2 => Action::Continue,
            3 => Action::CloseAndUnload,
            4 => Action::ChangeCore,
            5 => Action::FlushBuffers,
            6 => Action::ChangeProcess,
            7 => Action::ReadRegisters,
            8 => Action::RunScript,
            9 => Action::UserInput,
            10 => Action::RegisterEvent,
            11 => Action::AddActionToEvent,
            12 => Action::QueryAndModifyEvent,
            0x100 => Action::Started,
            0x101 => Action::LoggingMechanism,
            0x102 => Action::Paused,
            0x103 => Action::ResultOfChangingCore,
            0x104 => Action::ResultOfChangingProcess,
            0x105 => Action::ResultOfFlush,
            0x106 => Action::ResultOfReadingRegisters,
            0x107 => Action::ResultOfRunningScript,
            0x108 => Action::ResultOfRegisteringEvent,
            0x109 => Action::ResultOfAddingActionToEvent,
            0x10A => Action::ResultOfQueryAndModifyEvent,
            _ => return None,
        };
        Some(action)
    }
}

/// Represents the outcome of a command execution, placed in the result field of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Success = 0xFFFF_FFFF,
    InvalidRegisterNumber = 0xC000_0001,
    InvalidCoreId = 0xC000_0002,
    InvalidEventTag = 0xC000_0003,
    InvalidActionType = 0xC000_0004,
    InvalidProcessId = 0xC000_0005,
    ScriptFailed = 0xC000_0006,
}

impl Status {
    /// Converts `Status` to a u32 for the wire.
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Converts a `u32` value to a `Status` enum variant.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0xFFFF_FFFF => Some(Status::Success),
            0xC000_0001 => Some(Status::InvalidRegisterNumber),
            0xC000_0002 => Some(Status::InvalidCoreId),
            0xC000_0003 => Some(Status::InvalidEventTag),
            0xC000_0004 => Some(Status::InvalidActionType),
            0xC000_0005 => Some(Status::InvalidProcessId),
            0xC000_0006 => Some(Status::ScriptFailed),
            _ => None,
        }
    }
}

/// General purpose register identifiers, in the order they appear in the register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegisterId {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
    Rip = 16,
    Rflags = 17,
}

impl RegisterId {
    /// Every register, in block order.
    pub const ALL: [RegisterId; 18] = [
        RegisterId::Rax,
        RegisterId::Rcx,
        RegisterId::Rdx,
        RegisterId::Rbx,
        RegisterId::Rsp,
        RegisterId::Rbp,
        RegisterId::Rsi,
        RegisterId::Rdi,
        RegisterId::R8,
        RegisterId::R9,
        RegisterId::R10,
        RegisterId::R11,
        RegisterId::R12,
        RegisterId::R13,
        RegisterId::R14,
        RegisterId::R15,
        RegisterId::Rip,
        RegisterId::Rflags,
    ];

    /// Converts a `u32` value to a `RegisterId` enum variant.
    pub fn from_u32(value: u32) -> Option<RegisterId> {
        Self::ALL.get(value as usize).copied()
    }
}

/// Every register in [`RegisterId`] order, as returned for [`ALL_REGISTERS`].
pub type RegisterBlock = [U64; RegisterId::ALL.len()];

/// Size of the full register block.
pub const REGISTER_BLOCK_SIZE: usize = size_of::<RegisterBlock>();

/// The fixed header in front of every packet.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct PacketHeader {
    pub checksum: u8,
    pub indicator: U64,
    pub packet_type: U32,
    pub action: U32,
}

impl PacketHeader {
    /// Creates a header with a zero checksum.
    pub fn new(packet_type: PacketType, action: Action) -> Self {
        Self {
            checksum: 0,
            indicator: U64::new(INDICATOR),
            packet_type: U32::new(packet_type as u32),
            action: U32::new(action as u32),
        }
    }

    /// Computes the checksum over the header bytes that follow the checksum field, then over
    /// every part of the payload.
    pub fn compute_checksum(&self, payload: &[&[u8]]) -> u8 {
        let sum = checksum_of(&self.as_bytes()[1..], 0);
        payload.iter().fold(sum, |sum, part| checksum_of(part, sum))
    }
}

/// Adds every byte of `bytes` to `seed`, wrapping at 256.
pub fn checksum_of(bytes: &[u8], seed: u8) -> u8 {
    bytes.iter().fold(seed, |sum, byte| sum.wrapping_add(*byte))
}
