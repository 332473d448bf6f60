//! Seams between the debugger core and the hypervisor it lives in.
//!
//! The core never touches hardware directly. VMCS access, NMI delivery and everything the
//! supervising host component provides reach it through these traits, implemented by
//! [`crate::intel::platform`] on real hardware.

use {
    super::state::EventDetails,
    crate::intel::{capture::GuestRegisters, vmexit::vmcall::VmcallCommand},
};

/// Byte transport to the remote debugger.
pub trait Transport: Send {
    /// Writes `bytes` to the wire. Called several times in a row for one packet.
    fn send(&mut self, bytes: &[u8]);

    /// Polls for one received byte.
    fn receive_byte(&mut self) -> Option<u8>;
}

/// Access to the state of the guest running on a given core.
///
/// Every call for `core` is made by that core, so implementations backed by `vmread`/
/// `vmwrite` operate on the current VMCS.
pub trait Vcpu {
    fn guest_rflags(&self, core: usize) -> u64;

    fn set_guest_rflags(&self, core: usize, rflags: u64);

    /// Length of the instruction that caused the current vm-exit.
    fn exit_instruction_length(&self, core: usize) -> usize;

    fn set_monitor_trap_flag(&self, core: usize, enable: bool);

    /// Reads guest virtual memory without faulting. Returns `false` if unreadable.
    fn read_guest_memory(&self, core: usize, address: u64, buffer: &mut [u8]) -> bool;

    /// Transitions from guest to hypervisor with `command`.
    fn vmcall(&self, command: VmcallCommand);
}

/// Delivery of non-maskable inter-processor signals.
pub trait InterruptController {
    fn processor_count(&self) -> usize;

    fn send_nmi(&self, core: usize);
}

/// Requests forwarded to the supervising host component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostNotification {
    CloseAndUnload,
    UserInput,
    RegisterEvent,
    AddActionToEvent,
    ClearEvent,
}

/// Services of the supervising host component and the script/event engine.
pub trait HostServices {
    fn notify(&self, notification: HostNotification, buffer: &[u8]);

    /// Flushes the log buffers, returning how many messages were dropped in VMX root and
    /// in VMX non-root.
    fn flush_log_buffers(&self) -> (u32, u32);

    fn run_script(&self, core: usize, registers: &GuestRegisters, event: Option<EventDetails>, script: &[u8]) -> bool;

    fn event_exists(&self, tag: u64) -> bool;

    fn is_event_enabled(&self, tag: u64) -> bool;

    fn set_event_enabled(&self, tag: u64, enabled: bool);

    fn set_all_events_enabled(&self, enabled: bool);

    fn current_process_id(&self) -> u32;

    fn process_exists(&self, process_id: u32) -> bool;

    /// Switches to the address space of `process_id`, returning a token for the previous one.
    fn switch_to_process_address_space(&self, process_id: u32) -> u64;

    fn restore_previous_address_space(&self, token: u64);

    /// Schedules [`crate::kd::Debugger::execute_deferred`] to run on `core` outside VMX root.
    fn queue_deferred(&self, core: usize);

    /// Raises a breakpoint in the local kernel debugger.
    fn diagnostic_break(&self);
}

/// Everything the debugger core needs from its host.
pub trait Platform: Vcpu + InterruptController + HostServices + Sync {}

impl<T: Vcpu + InterruptController + HostServices + Sync> Platform for T {}
