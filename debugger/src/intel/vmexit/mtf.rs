//! Handles monitor trap flag exits raised by debugger single steps.

use {
    crate::{
        intel::{capture::GuestRegisters, vmexit::ExitType},
        kd::{
            coordinator::HaltOutcome,
            platform::{Platform, Transport},
            Debugger,
        },
    },
    log::trace,
};

/// Handles a monitor trap flag exit on `core`.
///
/// A trap that no step asked for is disarmed so the guest does not keep exiting.
pub fn handle_monitor_trap_flag<P: Platform, T: Transport>(debugger: &Debugger<P, T>, core: usize, registers: &mut GuestRegisters) -> ExitType {
    trace!("Handling Monitor Trap Flag exit on core {}", core);

    if debugger.handle_monitor_trap(core, registers) == HaltOutcome::NotOurs {
        debugger.disarm_step(core);
    }

    ExitType::Continue
}

/// Set the monitor trap flag
///
/// # Arguments
///
/// * `set` - A flag indicating whether to set the monitor trap flag.
#[cfg(target_arch = "x86_64")]
pub fn set_monitor_trap_flag(set: bool) {
    use {
        crate::intel::support::{vmread, vmwrite},
        x86::vmx::vmcs,
    };

    let controls = vmread(vmcs::control::PRIMARY_PROCBASED_EXEC_CONTROLS);
    let mut primary_controls = vmcs::control::PrimaryControls::from_bits_truncate(controls as u32);
    primary_controls.set(vmcs::control::PrimaryControls::MONITOR_TRAP_FLAG, set);

    vmwrite(vmcs::control::PRIMARY_PROCBASED_EXEC_CONTROLS, primary_controls.bits());
    trace!("Monitor Trap Flag set to: {}", set);
}
