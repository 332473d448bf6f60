//! The kernel debugger core: halting and resuming cores, electing the core that talks to
//! the remote debugger, and serving its commands while the machine is stopped.
//!
//! A single [`Debugger`] owns all shared state. Every entry point takes the calling core's
//! index and is safe to call from all cores at once.

pub mod codec;
pub mod coordinator;
pub mod deferred;
pub mod dispatcher;
pub mod lock;
pub mod platform;
pub mod relay;
pub mod state;
pub mod step;

#[cfg(test)]
pub(crate) mod mock;

use {
    alloc::vec::Vec,
    crate::{error::DebuggerError, global_const::MAX_CORES},
    codec::ReceiveBuffer,
    deferred::DeferredSlot,
    lock::SpinLock,
    log::*,
    platform::{Platform, Transport},
    spin::Mutex,
    state::{CoreState, HaltContext, Suppression},
};

pub struct Debugger<P: Platform, T: Transport> {
    platform: P,

    /// The transport, also serving as the global response lock.
    transport: Mutex<T>,

    /// Only the operating core receives, one frame at a time.
    receive_buffer: Mutex<ReceiveBuffer>,

    cores: [CoreState; MAX_CORES],

    processor_count: usize,

    /// Serializes entry into the election of the operating core.
    breakpoint_lock: SpinLock,

    halt: Mutex<HaltContext>,

    suppression: Suppression,

    /// One deferred-call descriptor per core, allocated up front.
    deferred: Vec<DeferredSlot>,
}

impl<P: Platform, T: Transport> Debugger<P, T> {
    /// Creates the debugger and allocates everything the halt path needs.
    ///
    /// Fails without enabling anything if the platform reports an unsupported processor
    /// count or an allocation fails.
    pub fn new(platform: P, transport: T) -> Result<Self, DebuggerError> {
        let processor_count = platform.processor_count();
        if processor_count == 0 {
            return Err(DebuggerError::NoProcessors);
        }
        if processor_count > MAX_CORES {
            return Err(DebuggerError::TooManyProcessors(processor_count));
        }

        let receive_buffer = ReceiveBuffer::new()?;

        let mut deferred = Vec::new();
        deferred
            .try_reserve_exact(processor_count)
            .map_err(|_| DebuggerError::DeferredCallAllocationFailed)?;
        deferred.resize_with(processor_count, DeferredSlot::new);

        debug!("Debugger initialized for {} processors", processor_count);

        Ok(Self {
            platform,
            transport: Mutex::new(transport),
            receive_buffer: Mutex::new(receive_buffer),
            cores: core::array::from_fn(|_| CoreState::new()),
            processor_count,
            breakpoint_lock: SpinLock::new(),
            halt: Mutex::new(HaltContext::new()),
            suppression: Suppression::new(),
            deferred,
        })
    }

    /// Releases every core and resets all halt state.
    pub fn uninitialize(&self) {
        debug!("Uninitializing debugger");

        for core in self.cores() {
            core.reset();
        }
        for slot in &self.deferred {
            slot.clear();
        }
        *self.halt.lock() = HaltContext::new();
        self.suppression.reset();
        self.receive_buffer.lock().discard();
        self.breakpoint_lock.unlock();
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn processor_count(&self) -> usize {
        self.processor_count
    }

    /// State of `core`, or `None` if it is out of range.
    pub fn core(&self, core: usize) -> Option<&CoreState> {
        self.cores[..self.processor_count].get(core)
    }

    /// State of every live core.
    pub fn cores(&self) -> &[CoreState] {
        &self.cores[..self.processor_count]
    }

    /// Snapshot of the current halt.
    pub fn halt_context(&self) -> HaltContext {
        *self.halt.lock()
    }

    pub fn suppression(&self) -> &Suppression {
        &self.suppression
    }

    /// Index of the operating core, if any.
    pub fn operating_core(&self) -> Option<usize> {
        self.cores().iter().position(|core| core.is_operating())
    }
}
