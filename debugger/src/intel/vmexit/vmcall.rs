//! Handles VMCALL exits issued by the debugger's own guest-side code.

use {
    crate::{
        error::DebuggerError,
        intel::{capture::GuestRegisters, vmexit::ExitType},
        kd::{
            platform::{Platform, Transport},
            state::HaltReason,
            Debugger,
        },
    },
    log::*,
};

/// Represents the VMCALL commands the guest can issue to the debugger.
#[repr(u64)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VmcallCommand {
    /// Halt every core, as if the debugger had paused the system.
    HaltSystem = 0x4442_0001,

    /// Halt again after a deferred switch into another process's address space.
    HaltAndChangeAddressSpace = 0x4442_0002,
}

/// Handles a VMCALL VM exit on `core`.
///
/// # Parameters
///
/// * `debugger`: The debugger instance.
/// * `core`: Index of the exiting core.
/// * `registers`: Guest registers; RAX carries the command.
///
/// # Returns
///
/// * `Ok(ExitType::IncrementRIP)`: The halt is over and the guest continues after the VMCALL.
/// * `Err(DebuggerError::UnknownVmcallCommand)`: RAX holds no debugger command.
pub fn handle_vmcall<P: Platform, T: Transport>(debugger: &Debugger<P, T>, core: usize, registers: &mut GuestRegisters) -> Result<ExitType, DebuggerError> {
    let command = VmcallCommand::try_from(registers.rax)?;
    debug!("Core {}: handling {:?}", core, command);

    let outcome = match command {
        VmcallCommand::HaltSystem | VmcallCommand::HaltAndChangeAddressSpace => {
            debugger.report_halt(core, HaltReason::Pause, registers, None)
        }
    };
    trace!("Core {}: {:?} finished with {:?}", core, command, outcome);

    Ok(ExitType::IncrementRIP)
}

/// Attempts to convert a u64 value to a VmcallCommand.
impl TryFrom<u64> for VmcallCommand {
    type Error = DebuggerError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            x if x == VmcallCommand::HaltSystem as u64 => Ok(VmcallCommand::HaltSystem),
            x if x == VmcallCommand::HaltAndChangeAddressSpace as u64 => Ok(VmcallCommand::HaltAndChangeAddressSpace),
            _ => Err(DebuggerError::UnknownVmcallCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::kd::mock::{MockPlatform, MockTransport},
        shared::{payload::PausedPacket, Action},
        zerocopy::FromBytes,
    };

    #[test]
    fn halt_vmcall_pauses_the_system() {
        let transport = MockTransport::new();
        transport.push_command(Action::Continue, &[]);
        let debugger = Debugger::new(MockPlatform::new(2), transport.clone()).unwrap();
        let mut registers = GuestRegisters {
            rax: VmcallCommand::HaltAndChangeAddressSpace as u64,
            ..Default::default()
        };

        assert_eq!(handle_vmcall(&debugger, 0, &mut registers), Ok(ExitType::IncrementRIP));

        let (paused, _) = PausedPacket::read_from_prefix(&transport.take_packets()[0].payload).unwrap();
        assert_eq!(paused.reason.get(), HaltReason::Pause as u32);
        assert_eq!(debugger.platform().nmi_count(1), 1);
    }

    #[test]
    fn unknown_command_is_an_error() {
        let debugger = Debugger::new(MockPlatform::new(1), MockTransport::new()).unwrap();
        let mut registers = GuestRegisters {
            rax: 0x1337,
            ..Default::default()
        };

        assert_eq!(handle_vmcall(&debugger, 0, &mut registers), Err(DebuggerError::UnknownVmcallCommand));
    }
}
