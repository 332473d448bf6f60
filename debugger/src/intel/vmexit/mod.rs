//! VM-exit handlers that hand control to the debugger core.
//!
//! The hypervisor's exit dispatch calls these with the index of the exiting core and its
//! saved guest registers, then acts on the returned [`ExitType`].

pub mod mtf;
pub mod nmi;
pub mod vmcall;

/// Represents the type of VM exit.
#[derive(Debug, Clone, Copy, PartialOrd, PartialEq, Eq)]
pub enum ExitType {
    IncrementRIP,
    Continue,
    /// The NMI was not meant for the debugger and must be delivered to the guest.
    ReinjectNmi,
}
