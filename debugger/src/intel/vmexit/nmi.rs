//! Handles NMI exits, which double as the cross-core halt signal.

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

/// Handles an NMI exit on `core`.
///
/// # Arguments
///
/// * `debugger` - The debugger instance.
/// * `core` - Index of the exiting core.
/// * `registers` - Guest registers saved at the exit.
///
/// # Returns
///
/// `ExitType::ReinjectNmi` if the NMI belongs to the guest, `ExitType::Continue` otherwise.
pub fn handle_nmi<P: Platform, T: Transport>(debugger: &Debugger<P, T>, core: usize, registers: &mut GuestRegisters) -> ExitType {
    trace!("Handling NMI exit on core {}", core);

    match debugger.handle_cross_core_signal(core, registers) {
        HaltOutcome::NotOurs | HaltOutcome::InvalidCore => ExitType::ReinjectNmi,
        _ => ExitType::Continue,
    }
}
