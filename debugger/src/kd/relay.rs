//! Cross-core halt signal.
//!
//! The NMI channel is shared with the platform's own use of NMIs, so delivering the
//! interrupt is not enough: the target is armed first and only an armed core treats the
//! arrival as a request to halt.

use {
    super::{
        coordinator::{CoreRunState, HaltOutcome},
        platform::{Platform, Transport},
        Debugger,
    },
    crate::intel::capture::GuestRegisters,
    log::*,
};

impl<P: Platform, T: Transport> Debugger<P, T> {
    /// Marks `core` as expecting a halt signal.
    pub fn arm(&self, core: usize) {
        if let Some(state) = self.core(core) {
            state.set_waiting_for_signal();
        }
    }

    /// Arms every core except `except_core` and sends each of them an NMI.
    pub fn notify_all(&self, except_core: usize) {
        for core in (0..self.processor_count()).filter(|core| *core != except_core) {
            self.arm(core);
            trace!("Core {}: sending halt NMI to core {}", except_core, core);
            self.platform.send_nmi(core);
        }
    }

    /// Entry point for an NMI that arrived on `core`.
    ///
    /// Returns [`HaltOutcome::NotOurs`] if the core was not armed; the caller must then hand
    /// the NMI to the platform unchanged.
    pub fn handle_cross_core_signal(&self, core: usize, registers: &mut GuestRegisters) -> HaltOutcome {
        let Some(state) = self.core(core) else {
            return HaltOutcome::InvalidCore;
        };

        if !state.take_waiting_for_signal() {
            return HaltOutcome::NotOurs;
        }

        trace!("Core {}: halted by cross-core signal", core);
        state.set_last_exit_rip(registers.rip);
        self.run_state_machine(core, CoreRunState::PassiveHalt, registers);
        HaltOutcome::Resumed
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::kd::mock::{MockPlatform, MockTransport},
    };

    #[test]
    fn unarmed_signal_is_not_ours() {
        let debugger = Debugger::new(MockPlatform::new(2), MockTransport::new()).unwrap();
        let mut registers = GuestRegisters::default();

        assert_eq!(debugger.handle_cross_core_signal(1, &mut registers), HaltOutcome::NotOurs);
        assert_eq!(debugger.handle_cross_core_signal(7, &mut registers), HaltOutcome::InvalidCore);
        assert!(!debugger.core(1).unwrap().is_halted());
    }

    #[test]
    fn notify_all_skips_the_sender() {
        let debugger = Debugger::new(MockPlatform::new(3), MockTransport::new()).unwrap();
        debugger.notify_all(1);

        assert_eq!(debugger.platform().nmi_count(0), 1);
        assert_eq!(debugger.platform().nmi_count(1), 0);
        assert_eq!(debugger.platform().nmi_count(2), 1);
        assert!(debugger.core(0).unwrap().is_waiting_for_signal());
        assert!(!debugger.core(1).unwrap().is_waiting_for_signal());
    }

    #[test]
    fn armed_signal_is_consumed_once() {
        let debugger = Debugger::new(MockPlatform::new(2), MockTransport::new()).unwrap();
        let mut registers = GuestRegisters {
            rip: 0x1000,
            ..Default::default()
        };

        // Nothing holds the lock of core 1, so its passive halt ends immediately.
        debugger.arm(1);
        assert_eq!(debugger.handle_cross_core_signal(1, &mut registers), HaltOutcome::Resumed);
        assert_eq!(debugger.core(1).unwrap().last_exit_rip(), 0x1000);
        assert!(!debugger.core(1).unwrap().is_halted());
        assert_eq!(debugger.handle_cross_core_signal(1, &mut registers), HaltOutcome::NotOurs);
    }
}
