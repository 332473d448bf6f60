//! Per-core halt state and the process-wide halt context.
//!
//! `CoreState` for core N is written by core N itself, except `is_operating` which the
//! outgoing operating core moves during a core switch. That single-writer discipline is
//! what lets plain atomics stand in for field-level locking.

use {
    super::lock::SpinLock,
    core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    shared::Action,
};

/// Why the debuggee is halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum HaltReason {
    #[default]
    None = 0,
    Breakpoint = 1,
    Step = 2,
    Pause = 3,
    CommandFinished = 4,
    EventTriggered = 5,
    CoreSwitched = 6,
}

/// Identifies the event that triggered a halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDetails {
    pub tag: u64,
    pub context: u64,
}

/// Snapshot of the current halt, valid while a halt is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HaltContext {
    pub reason: HaltReason,
    pub event: Option<EventDetails>,
}

impl HaltContext {
    pub const fn new() -> Self {
        Self {
            reason: HaltReason::None,
            event: None,
        }
    }
}

/// State kept for every logical core.
pub struct CoreState {
    /// Held while the core must stay halted.
    pub(crate) lock: SpinLock,
    is_operating: AtomicBool,
    waiting_for_signal: AtomicBool,
    suppress_relay: AtomicBool,
    step_armed: AtomicBool,
    step_ignore_next_clear: AtomicBool,
    restore_interrupts_on_resume: AtomicBool,
    last_exit_rip: AtomicU64,
}

impl CoreState {
    pub const fn new() -> Self {
        Self {
            lock: SpinLock::new(),
            is_operating: AtomicBool::new(false),
            waiting_for_signal: AtomicBool::new(false),
            suppress_relay: AtomicBool::new(false),
            step_armed: AtomicBool::new(false),
            step_ignore_next_clear: AtomicBool::new(false),
            restore_interrupts_on_resume: AtomicBool::new(false),
            last_exit_rip: AtomicU64::new(0),
        }
    }

    /// Clears every flag and releases the lock.
    pub fn reset(&self) {
        self.is_operating.store(false, Ordering::Release);
        self.waiting_for_signal.store(false, Ordering::Release);
        self.suppress_relay.store(false, Ordering::Release);
        self.step_armed.store(false, Ordering::Release);
        self.step_ignore_next_clear.store(false, Ordering::Release);
        self.restore_interrupts_on_resume.store(false, Ordering::Release);
        self.last_exit_rip.store(0, Ordering::Release);
        self.lock.unlock();
    }

    pub fn is_operating(&self) -> bool {
        self.is_operating.load(Ordering::Acquire)
    }

    pub(crate) fn set_operating(&self, value: bool) {
        self.is_operating.store(value, Ordering::Release);
    }

    pub fn is_waiting_for_signal(&self) -> bool {
        self.waiting_for_signal.load(Ordering::Acquire)
    }

    pub(crate) fn set_waiting_for_signal(&self) {
        self.waiting_for_signal.store(true, Ordering::Release);
    }

    /// Clears the armed signal flag. Returns `true` only for the caller that observed it set.
    pub(crate) fn take_waiting_for_signal(&self) -> bool {
        self.waiting_for_signal.swap(false, Ordering::AcqRel)
    }

    pub fn is_relay_suppressed(&self) -> bool {
        self.suppress_relay.load(Ordering::Acquire)
    }

    pub(crate) fn suppress_relay(&self) {
        self.suppress_relay.store(true, Ordering::Release);
    }

    /// Consumes the one-shot relay suppression.
    pub(crate) fn take_suppress_relay(&self) -> bool {
        self.suppress_relay.swap(false, Ordering::AcqRel)
    }

    pub fn is_step_armed(&self) -> bool {
        self.step_armed.load(Ordering::Acquire)
    }

    pub(crate) fn set_step_armed(&self, value: bool) {
        self.step_armed.store(value, Ordering::Release);
    }

    pub fn ignores_next_step_clear(&self) -> bool {
        self.step_ignore_next_clear.load(Ordering::Acquire)
    }

    pub(crate) fn set_step_ignore_next_clear(&self, value: bool) {
        self.step_ignore_next_clear.store(value, Ordering::Release);
    }

    pub(crate) fn take_step_ignore_next_clear(&self) -> bool {
        self.step_ignore_next_clear.swap(false, Ordering::AcqRel)
    }

    pub fn restores_interrupts_on_resume(&self) -> bool {
        self.restore_interrupts_on_resume.load(Ordering::Acquire)
    }

    pub(crate) fn set_restore_interrupts_on_resume(&self) {
        self.restore_interrupts_on_resume.store(true, Ordering::Release);
    }

    pub(crate) fn take_restore_interrupts_on_resume(&self) -> bool {
        self.restore_interrupts_on_resume.swap(false, Ordering::AcqRel)
    }

    pub fn last_exit_rip(&self) -> u64 {
        self.last_exit_rip.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_exit_rip(&self, rip: u64) {
        self.last_exit_rip.store(rip, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.lock.is_locked()
    }
}

impl Default for CoreState {
    fn default() -> Self {
        Self::new()
    }
}

/// The pending "ignore halts until this response is sent" directive.
///
/// Zero means no directive; otherwise the raw value of the awaited [`Action`].
pub struct Suppression {
    pending: AtomicU32,
}

impl Suppression {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
        }
    }

    /// Arms the directive, replacing any outstanding one.
    pub fn arm(&self, until: Action) {
        self.pending.store(until as u32, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }

    pub fn pending(&self) -> Option<Action> {
        Action::from_u32(self.pending.load(Ordering::Acquire))
    }

    /// Clears the directive if `sent` is the awaited response. Returns `true` when cleared.
    pub fn clear_if(&self, sent: Action) -> bool {
        self.pending
            .compare_exchange(sent as u32, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn reset(&self) {
        self.pending.store(0, Ordering::Release);
    }
}

impl Default for Suppression {
    fn default() -> Self {
        Self::new()
    }
}
