//! Single-instruction stepping through the monitor trap flag.
//!
//! Interrupts are masked in the guest for the stepped instruction so the trap lands on the
//! next instruction of the same flow. The saved interrupt flag is restored once, when the
//! core fully resumes or hands over the operating role.

use {
    super::{
        coordinator::HaltOutcome,
        platform::{Platform, Transport},
        state::HaltReason,
        Debugger,
    },
    crate::{global_const::RFLAGS_IF, intel::capture::GuestRegisters},
    log::*,
};

impl<P: Platform, T: Transport> Debugger<P, T> {
    /// Arms a one-instruction trap on `core`.
    pub fn step(&self, core: usize) {
        let Some(state) = self.core(core) else {
            return;
        };

        state.set_step_armed(true);
        state.set_step_ignore_next_clear(true);

        let rflags = self.platform.guest_rflags(core);
        if rflags & RFLAGS_IF != 0 {
            // Only the first arming sees IF set; later steps find it already cleared.
            state.set_restore_interrupts_on_resume();
            self.platform.set_guest_rflags(core, rflags & !RFLAGS_IF);
        }

        self.platform.set_monitor_trap_flag(core, true);
        trace!("Core {}: step armed", core);
    }

    /// Handles a monitor trap vm-exit. Returns [`HaltOutcome::NotOurs`] when no step was
    /// requested on `core`, leaving the trap to its other users.
    pub fn handle_monitor_trap(&self, core: usize, registers: &mut GuestRegisters) -> HaltOutcome {
        let Some(state) = self.core(core) else {
            return HaltOutcome::InvalidCore;
        };

        if !state.is_step_armed() {
            return HaltOutcome::NotOurs;
        }

        state.set_step_armed(false);
        state.take_step_ignore_next_clear();
        self.platform.set_monitor_trap_flag(core, false);

        self.report_halt(core, HaltReason::Step, registers, None)
    }

    /// Called by other users of the monitor trap flag before disabling it.
    ///
    /// Returns `false` and keeps the trap armed once if a step is pending on `core`.
    pub fn disarm_step(&self, core: usize) -> bool {
        let Some(state) = self.core(core) else {
            return false;
        };

        if state.is_step_armed() && state.take_step_ignore_next_clear() {
            trace!("Core {}: monitor trap kept armed for a pending step", core);
            return false;
        }

        state.set_step_armed(false);
        self.platform.set_monitor_trap_flag(core, false);
        true
    }

    /// Restores the interrupt flag saved by [`Debugger::step`], at most once.
    pub(crate) fn restore_interrupts(&self, core: usize) {
        if self.cores[core].take_restore_interrupts_on_resume() {
            let rflags = self.platform.guest_rflags(core);
            self.platform.set_guest_rflags(core, rflags | RFLAGS_IF);
            trace!("Core {}: interrupts restored", core);
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::kd::{
            mock::{MockPlatform, MockTransport},
            platform::Vcpu,
        },
        shared::Action,
    };

    #[test]
    fn step_masks_interrupts_until_full_resume() {
        let platform = MockPlatform::new(1);
        platform.preset_rflags(0, 0x246);
        let transport = MockTransport::new();
        transport.push_command(Action::Step, &[]);
        transport.push_command(Action::Step, &[]);
        transport.push_command(Action::Continue, &[]);
        let debugger = Debugger::new(platform, transport.clone()).unwrap();
        let mut registers = GuestRegisters::default();

        debugger.report_halt(0, HaltReason::Breakpoint, &mut registers, None);
        assert_eq!(debugger.platform().guest_rflags(0) & RFLAGS_IF, 0);
        assert!(debugger.platform().monitor_trap_flag(0));
        assert!(debugger.core(0).unwrap().restores_interrupts_on_resume());

        // Second step: IF is already clear and the saved state is kept.
        assert_eq!(debugger.handle_monitor_trap(0, &mut registers), HaltOutcome::Resumed);
        assert_eq!(debugger.platform().guest_rflags(0) & RFLAGS_IF, 0);
        assert!(debugger.core(0).unwrap().restores_interrupts_on_resume());

        // Continue restores IF exactly once.
        assert_eq!(debugger.handle_monitor_trap(0, &mut registers), HaltOutcome::Resumed);
        assert_eq!(debugger.platform().guest_rflags(0), 0x246);
        assert!(!debugger.core(0).unwrap().restores_interrupts_on_resume());
        assert!(!debugger.platform().monitor_trap_flag(0));
        assert_eq!(debugger.platform().rflags_writes(0), 2);
    }

    #[test]
    fn step_with_interrupts_disabled_saves_nothing() {
        let platform = MockPlatform::new(1);
        platform.preset_rflags(0, 0x2);
        let debugger = Debugger::new(platform, MockTransport::new()).unwrap();

        debugger.step(0);
        assert!(!debugger.core(0).unwrap().restores_interrupts_on_resume());
        debugger.restore_interrupts(0);
        assert_eq!(debugger.platform().guest_rflags(0), 0x2);
    }

    #[test]
    fn step_keeps_other_cores_halted() {
        let transport = MockTransport::new();
        transport.push_command(Action::Step, &[]);
        let debugger = Debugger::new(MockPlatform::new(2), transport.clone()).unwrap();
        let mut registers = GuestRegisters::default();

        debugger.report_halt(0, HaltReason::Breakpoint, &mut registers, None);
        assert!(debugger.core(1).unwrap().is_halted());
        assert!(!debugger.core(0).unwrap().is_halted());
        assert!(debugger.core(0).unwrap().is_relay_suppressed());

        transport.push_command(Action::Continue, &[]);
        assert_eq!(debugger.handle_monitor_trap(0, &mut registers), HaltOutcome::Resumed);
        assert_eq!(debugger.platform().nmi_count(1), 1);
        assert!(!debugger.core(1).unwrap().is_halted());
    }

    #[test]
    fn foreign_monitor_trap_is_not_ours() {
        let debugger = Debugger::new(MockPlatform::new(1), MockTransport::new()).unwrap();
        assert_eq!(
            debugger.handle_monitor_trap(0, &mut GuestRegisters::default()),
            HaltOutcome::NotOurs
        );
    }

    #[test]
    fn disarm_is_ignored_once_while_stepping() {
        let debugger = Debugger::new(MockPlatform::new(1), MockTransport::new()).unwrap();
        debugger.step(0);

        assert!(!debugger.disarm_step(0));
        assert!(debugger.platform().monitor_trap_flag(0));
        assert!(debugger.disarm_step(0));
        assert!(!debugger.platform().monitor_trap_flag(0));
        assert!(!debugger.core(0).unwrap().is_step_armed());
    }
}
