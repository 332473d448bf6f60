//! Process switches deferred to a guest-side callback.
//!
//! Changing the address space is not possible from inside the halt. The operating core
//! records the target process in the core's slot and asks the host to run
//! [`Debugger::execute_deferred`] on that core; the callback switches, halts again through
//! a vmcall in the new context, and switches back once released.

use {
    super::{
        platform::{Platform, Transport},
        Debugger,
    },
    crate::intel::vmexit::vmcall::VmcallCommand,
    core::sync::atomic::{AtomicBool, AtomicU32, Ordering},
    log::*,
};

/// A queued process switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredCall {
    pub process_id: u32,
}

/// Per-core storage for one [`DeferredCall`], allocated at initialization.
pub struct DeferredSlot {
    pending: AtomicBool,
    process_id: AtomicU32,
}

impl DeferredSlot {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            process_id: AtomicU32::new(0),
        }
    }

    /// Stores `call`, replacing one that has not run yet.
    pub fn store(&self, call: DeferredCall) {
        self.process_id.store(call.process_id, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    pub fn take(&self) -> Option<DeferredCall> {
        self.pending.swap(false, Ordering::AcqRel).then(|| DeferredCall {
            process_id: self.process_id.load(Ordering::Relaxed),
        })
    }

    pub fn peek(&self) -> Option<DeferredCall> {
        self.pending.load(Ordering::Acquire).then(|| DeferredCall {
            process_id: self.process_id.load(Ordering::Relaxed),
        })
    }

    pub fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

impl Default for DeferredSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform, T: Transport> Debugger<P, T> {
    /// Queues a switch to `process_id` on `core` without waiting for it.
    pub(crate) fn queue_process_switch(&self, core: usize, process_id: u32) {
        self.deferred[core].store(DeferredCall { process_id });
        self.platform.queue_deferred(core);
        debug!("Core {}: switch to process {} deferred", core, process_id);
    }

    /// Process targeted by the switch queued on `core`, if any.
    pub fn deferred_process_id(&self, core: usize) -> Option<u32> {
        self.deferred.get(core)?.peek().map(|call| call.process_id)
    }

    /// Runs the switch queued on `core`. Called by the host from guest context on that core.
    ///
    /// Returns `false` if nothing was queued.
    pub fn execute_deferred(&self, core: usize) -> bool {
        let Some(call) = self.deferred.get(core).and_then(DeferredSlot::take) else {
            warn!("Core {}: deferred callback without a queued switch", core);
            return false;
        };

        let token = self.platform.switch_to_process_address_space(call.process_id);
        trace!("Core {}: in address space of process {}", core, call.process_id);

        // Halts the system again, now in the context of the target process.
        self.platform.vmcall(VmcallCommand::HaltAndChangeAddressSpace);

        self.platform.restore_previous_address_space(token);
        true
    }
}
