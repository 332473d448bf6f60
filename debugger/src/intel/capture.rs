//! Guest register snapshot handed to the debugger on every halting event.
//!
//! The vm-exit layer saves the general-purpose registers of the guest on the host stack and
//! passes them down; RIP, RSP and RFLAGS are filled from the VMCS. The debugger reports them
//! to the remote side in [`RegisterId`] order.

use {
    core::fmt,
    shared::{RegisterBlock, RegisterId},
    zerocopy::byteorder::little_endian::U64,
};

/// Represents the state of guest general-purpose registers along with RFLAGS, RSP, and RIP.
#[repr(C, align(16))]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct GuestRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
}
static_assertions::const_assert_eq!(core::mem::size_of::<GuestRegisters>(), 0x90);

impl GuestRegisters {
    /// Returns the value of a single register.
    pub fn read(&self, register: RegisterId) -> u64 {
        match register {
            RegisterId::Rax => self.rax,
            RegisterId::Rcx => self.rcx,
            RegisterId::Rdx => self.rdx,
            RegisterId::Rbx => self.rbx,
            RegisterId::Rsp => self.rsp,
            RegisterId::Rbp => self.rbp,
            RegisterId::Rsi => self.rsi,
            RegisterId::Rdi => self.rdi,
            RegisterId::R8 => self.r8,
            RegisterId::R9 => self.r9,
            RegisterId::R10 => self.r10,
            RegisterId::R11 => self.r11,
            RegisterId::R12 => self.r12,
            RegisterId::R13 => self.r13,
            RegisterId::R14 => self.r14,
            RegisterId::R15 => self.r15,
            RegisterId::Rip => self.rip,
            RegisterId::Rflags => self.rflags,
        }
    }

    /// Every register in [`RegisterId`] order.
    pub fn to_block(&self) -> RegisterBlock {
        RegisterId::ALL.map(|register| U64::new(self.read(register)))
    }
}

impl fmt::Debug for GuestRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GuestRegisters {\n")?;

        // General-purpose registers in 4 columns
        writeln!(
            f,
            "  rax: {:#018x}, rbx: {:#018x}, rcx: {:#018x}, rdx: {:#018x}",
            self.rax, self.rbx, self.rcx, self.rdx
        )?;
        writeln!(
            f,
            "  rsi: {:#018x}, rdi: {:#018x}, rbp: {:#018x}, r8: {:#018x}",
            self.rsi, self.rdi, self.rbp, self.r8
        )?;
        writeln!(
            f,
            "  r9: {:#018x}, r10: {:#018x}, r11: {:#018x}, r12: {:#018x}",
            self.r9, self.r10, self.r11, self.r12
        )?;
        writeln!(
            f,
            "  r13: {:#018x}, r14: {:#018x}, r15: {:#018x}, rip: {:#018x}",
            self.r13, self.r14, self.r15, self.rip
        )?;
        writeln!(f, "  rsp: {:#018x}, rflags: {:#018x}", self.rsp, self.rflags)?;

        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_follows_register_id_order() {
        let registers = GuestRegisters {
            rax: 1,
            rcx: 2,
            rbx: 4,
            rip: 0xFFFF_F800_1234_5678,
            rflags: 0x202,
            ..Default::default()
        };

        let block = registers.to_block();
        let word = |index: usize| block[index].get();

        assert_eq!(word(RegisterId::Rax as usize), 1);
        assert_eq!(word(RegisterId::Rcx as usize), 2);
        assert_eq!(word(RegisterId::Rbx as usize), 4);
        assert_eq!(word(RegisterId::Rip as usize), 0xFFFF_F800_1234_5678);
        assert_eq!(word(RegisterId::Rflags as usize), 0x202);
    }

    #[test]
    fn each_register_reads_its_own_field() {
        let mut registers = GuestRegisters::default();
        registers.r11 = 11;
        registers.r12 = 12;

        assert_eq!(registers.read(RegisterId::R11), 11);
        assert_eq!(registers.read(RegisterId::R12), 12);
        assert_eq!(registers.read(RegisterId::R10), 0);
    }
}
