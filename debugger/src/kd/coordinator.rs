//! Halt/resume state machine.
//!
//! Every halting event on every core ends up in [`Debugger::run_state_machine`]. The first
//! core through the breakpoint lock becomes the operating core, locks every other core on
//! its behalf and signals it; the others park in [`CoreRunState::PassiveHalt`] on their own
//! lock until released or designated as the next operating core.

use {
    super::{
        dispatcher::DispatchExit,
        platform::{Platform, Transport},
        state::{EventDetails, HaltContext, HaltReason},
        Debugger,
    },
    crate::intel::capture::GuestRegisters,
    log::*,
    shared::{
        payload::{PausedPacket, MAXIMUM_INSTR_SIZE},
        Action, Status,
    },
    zerocopy::{
        byteorder::little_endian::{U32, U64},
        IntoBytes,
    },
};

/// Where a core currently is in the halt cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreRunState {
    Running,
    ElectingOperating {
        reason: HaltReason,
        event: Option<EventDetails>,
        notify_others: bool,
    },
    Operating,
    PassiveHalt,
    Resuming(ResumeScope),
}

/// Which cores a resume releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeScope {
    AllCores,
    CurrentCore,
}

/// Result of a halt entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltOutcome {
    /// The core went through a halt and the guest may continue.
    Resumed,

    /// A suppression directive is pending; the halt was not reported.
    Suppressed,

    /// The core is already the operating core.
    Nested,

    /// The event was not meant for the debugger.
    NotOurs,

    /// The core index is outside the live processor count.
    InvalidCore,
}

impl<P: Platform, T: Transport> Debugger<P, T> {
    /// Reports a local halting condition on `core` and blocks until the core may resume.
    ///
    /// # Arguments
    ///
    /// * `core` - Index of the calling core.
    /// * `reason` - Why the core halted.
    /// * `registers` - Guest registers captured at the vm-exit.
    /// * `event` - The triggering event, if any.
    pub fn report_halt(&self, core: usize, reason: HaltReason, registers: &mut GuestRegisters, event: Option<EventDetails>) -> HaltOutcome {
        self.enter_halt(core, reason, registers, event, true)
    }

    /// Pauses the whole system from `core`.
    pub fn halt_all_cores(&self, core: usize, registers: &mut GuestRegisters) -> HaltOutcome {
        self.report_halt(core, HaltReason::Pause, registers, None)
    }

    /// Pauses only `core`, leaving the other cores running.
    pub fn halt_current_core_only(&self, core: usize, registers: &mut GuestRegisters) -> HaltOutcome {
        self.enter_halt(core, HaltReason::Pause, registers, None, false)
    }

    fn enter_halt(
        &self,
        core: usize,
        reason: HaltReason,
        registers: &mut GuestRegisters,
        event: Option<EventDetails>,
        notify_others: bool,
    ) -> HaltOutcome {
        let Some(state) = self.core(core) else {
            error!("Halt reported on unknown core {}", core);
            return HaltOutcome::InvalidCore;
        };

        if state.is_operating() {
            warn!("Core {}: nested halt ({:?}) ignored while operating", core, reason);
            return HaltOutcome::Nested;
        }

        // A step leaves the other cores halted. The flag covers the first halt after it,
        // whether or not that halt gets reported.
        let stepped = state.take_suppress_relay();
        let notify_others = notify_others && !stepped;

        if self.suppression.is_active() {
            trace!("Core {}: halt ({:?}) suppressed until {:?}", core, reason, self.suppression.pending());
            return HaltOutcome::Suppressed;
        }

        state.set_last_exit_rip(registers.rip);
        self.run_state_machine(
            core,
            CoreRunState::ElectingOperating {
                reason,
                event,
                notify_others,
            },
            registers,
        )
    }

    /// Drives `core` from `initial` until it returns to [`CoreRunState::Running`].
    pub(crate) fn run_state_machine(&self, core: usize, initial: CoreRunState, registers: &mut GuestRegisters) -> HaltOutcome {
        let state = &self.cores[core];
        let mut run_state = initial;

        loop {
            trace!("Core {}: {:?}", core, run_state);

            run_state = match run_state {
                CoreRunState::Running => return HaltOutcome::Resumed,

                CoreRunState::ElectingOperating {
                    reason,
                    event,
                    notify_others,
                } => {
                    if reason == HaltReason::CoreSwitched {
                        // Designated by the previous operating core, which left both the
                        // breakpoint lock and our own lock held for us.
                        *self.halt.lock() = HaltContext { reason, event: None };
                    } else {
                        if !self.acquire_breakpoint_lock(core, registers) {
                            return HaltOutcome::Suppressed;
                        }
                        state.lock.lock();
                        self.elect(core, reason, event, notify_others);
                    }
                    CoreRunState::Operating
                }

                CoreRunState::Operating => {
                    self.send_pause_report(core, registers);

                    match self.dispatch_commands(core, registers) {
                        DispatchExit::ResumeAll => CoreRunState::Resuming(ResumeScope::AllCores),
                        DispatchExit::ResumeCurrentCore => CoreRunState::Resuming(ResumeScope::CurrentCore),
                        DispatchExit::CoreSwitched(target) => {
                            // Our own lock stays held, so the passive halt below waits
                            // until the new operating core releases us.
                            self.cores[target].lock.unlock();
                            CoreRunState::PassiveHalt
                        }
                    }
                }

                CoreRunState::PassiveHalt => {
                    state.lock.lock();

                    if state.is_operating() {
                        CoreRunState::ElectingOperating {
                            reason: HaltReason::CoreSwitched,
                            event: None,
                            notify_others: false,
                        }
                    } else {
                        state.lock.unlock();
                        self.restore_interrupts(core);
                        CoreRunState::Running
                    }
                }

                CoreRunState::Resuming(scope) => {
                    self.resume(core, scope);
                    CoreRunState::Running
                }
            };
        }
    }

    /// Spins on the breakpoint lock. Returns `false` if a suppression directive showed up
    /// while waiting, in which case the lock is not held.
    fn acquire_breakpoint_lock(&self, core: usize, registers: &mut GuestRegisters) -> bool {
        let state = &self.cores[core];

        loop {
            // The operating core signals us while we spin; the NMI cannot preempt the spin
            // in VMX root, so serve it here.
            self.breakpoint_lock.lock_with(|| {
                if state.take_waiting_for_signal() {
                    trace!("Core {}: serving halt signal while waiting for the breakpoint lock", core);
                    self.run_state_machine(core, CoreRunState::PassiveHalt, registers);
                }
            });

            // Armed by a halt that released the breakpoint lock but not this core.
            if state.take_waiting_for_signal() {
                self.breakpoint_lock.unlock();
                self.run_state_machine(core, CoreRunState::PassiveHalt, registers);
                continue;
            }

            break;
        }

        if self.suppression.is_active() {
            trace!("Core {}: suppression armed while waiting, dropping halt", core);
            self.breakpoint_lock.unlock();
            return false;
        }

        true
    }

    /// Makes `core` the operating core and, if `notify_others` is set, halts the others.
    fn elect(&self, core: usize, reason: HaltReason, event: Option<EventDetails>, notify_others: bool) {
        self.cores[core].set_operating(true);
        *self.halt.lock() = HaltContext { reason, event };

        if !notify_others {
            trace!("Core {}: halting without notifying other cores", core);
            return;
        }

        // Each lock is taken on behalf of its core and held until the halt ends.
        for other in (0..self.processor_count).filter(|other| *other != core) {
            self.cores[other].lock.lock();
        }
        self.notify_all(core);
    }

    /// Sends the pause report for the current halt.
    fn send_pause_report(&self, core: usize, registers: &GuestRegisters) {
        let halt = self.halt_context();

        let mut packet = PausedPacket {
            rip: U64::new(registers.rip),
            reason: U32::new(halt.reason as u32),
            core: U32::new(core as u32),
            event_tag: U64::new(halt.event.map_or(0, |event| event.tag)),
            ..Default::default()
        };

        let length = match self.platform.exit_instruction_length(core) {
            0 => MAXIMUM_INSTR_SIZE,
            length => length.min(MAXIMUM_INSTR_SIZE),
        };
        if self.platform.read_guest_memory(core, registers.rip, &mut packet.instruction_bytes[..length]) {
            packet.instruction_len = U32::new(length as u32);
        } else {
            warn!("Core {}: instruction bytes at {:#x} unreadable", core, registers.rip);
        }

        debug!("Core {}: paused ({:?}) at {:#x}", core, halt.reason, registers.rip);
        self.send_response(Action::Paused, packet.as_bytes(), &[]);
    }

    /// Moves the operating role from `core` to `target`.
    ///
    /// Leaves every state untouched if `target` is not a halted core.
    pub(crate) fn switch_operating_core(&self, core: usize, target: usize) -> Result<(), Status> {
        let Some(target_state) = self.core(target) else {
            return Err(Status::InvalidCoreId);
        };
        if !target_state.is_halted() {
            return Err(Status::InvalidCoreId);
        }

        self.cores[core].set_operating(false);
        target_state.set_operating(true);
        self.halt.lock().reason = HaltReason::CoreSwitched;
        self.restore_interrupts(core);

        debug!("Operating core switched from {} to {}", core, target);
        Ok(())
    }

    /// Ends the halt, releasing either every core or only `core`.
    fn resume(&self, core: usize, scope: ResumeScope) {
        let state = &self.cores[core];

        state.set_operating(false);
        *self.halt.lock() = HaltContext::new();

        match scope {
            ResumeScope::AllCores => {
                self.restore_interrupts(core);
                for other in self.cores() {
                    other.lock.unlock();
                }
                trace!("Core {}: all cores resumed", core);
            }
            ResumeScope::CurrentCore => {
                state.lock.unlock();
                trace!("Core {}: resumed alone", core);
            }
        }

        self.breakpoint_lock.unlock();
    }
}
