//! Thin wrappers over the privileged instructions the debugger needs in VMX root.

use log::error;

/// Read a specified field from a VMCS.
pub fn vmread(field: u32) -> u64 {
    unsafe { x86::bits64::vmx::vmread(field) }.unwrap_or(0)
}

/// Write to a specified field in a VMCS.
pub fn vmwrite<T: Into<u64>>(field: u32, val: T)
where
    u64: From<T>,
{
    if unsafe { x86::bits64::vmx::vmwrite(field, u64::from(val)) }.is_err() {
        error!("VMWRITE to field {:#x} failed", field);
    }
}

/// Writes a value to an MSR.
pub fn wrmsr(msr: u32, value: u64) {
    unsafe { x86::msr::wrmsr(msr, value) };
}

/// Reads 8-bits from an IO port.
pub fn inb(port: u16) -> u8 {
    unsafe { x86::io::inb(port) }
}

/// Writes 8-bits to an IO port.
pub fn outb(port: u16, val: u8) {
    unsafe { x86::io::outb(port, val) };
}

/// Raises a breakpoint exception on the current core.
pub fn int3() {
    unsafe { core::arch::asm!("int3", options(nomem, nostack)) };
}

/// Transitions from the guest to the hypervisor with `command` in RAX.
pub fn vmcall(command: u64) {
    unsafe { core::arch::asm!("vmcall", inout("rax") command => _, options(nostack)) };
}
