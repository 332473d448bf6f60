//! Command loop of the operating core.
//!
//! Each received packet is validated and mapped to one action. Actions that end the halt
//! return a [`DispatchExit`]; everything else replies in place and waits for the next
//! command.

use {
    super::{
        codec::decode_packet,
        platform::{HostNotification, Platform, Transport},
        Debugger,
    },
    crate::intel::capture::GuestRegisters,
    log::*,
    shared::{
        payload::{
            BufferPacket, ChangeCorePacket, ChangeProcessAction, ChangeProcessPacket, FlushPacket, ModifyEventAction,
            ModifyEventPacket, RegisterReadPacket,
        },
        Action, RegisterId, Status, ALL_EVENTS_TAG, ALL_REGISTERS,
    },
    zerocopy::{
        byteorder::little_endian::{U32, U64},
        FromBytes, IntoBytes,
    },
};

/// How the operating core leaves the command loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchExit {
    /// Release every core.
    ResumeAll,

    /// Release only the operating core; the others stay halted.
    ResumeCurrentCore,

    /// The operating role moved to the given core.
    CoreSwitched(usize),
}

impl<P: Platform, T: Transport> Debugger<P, T> {
    /// Receives and executes commands until one of them ends the halt.
    pub(crate) fn dispatch_commands(&self, core: usize, registers: &mut GuestRegisters) -> DispatchExit {
        let mut buffer = self.receive_buffer.lock();

        loop {
            let len = match self.receive_frame(&mut buffer) {
                Ok(len) => len,
                Err(error) => {
                    warn!("Core {}: receive failed: {}", core, error);
                    continue;
                }
            };

            let (header, payload) = match decode_packet(buffer.frame(len)) {
                Ok(packet) => packet,
                Err(error) => {
                    warn!("Core {}: packet discarded: {}", core, error);
                    continue;
                }
            };

            let Some(action) = Action::from_u32(header.action.get()) else {
                warn!("Core {}: unknown action {:#x} ignored", core, header.action.get());
                continue;
            };

            debug!("Core {}: received {:?}", core, action);

            if let Some(exit) = self.handle_command(core, registers, action, payload) {
                return exit;
            }
        }
    }

    /// Executes one command. Returns `Some` when the command ends the halt.
    fn handle_command(&self, core: usize, registers: &mut GuestRegisters, action: Action, payload: &[u8]) -> Option<DispatchExit> {
        match action {
            Action::Continue => Some(DispatchExit::ResumeAll),

            Action::Step => {
                self.step(core);
                // The other cores stay halted, so the trap must not signal them again.
                self.cores[core].suppress_relay();
                Some(DispatchExit::ResumeCurrentCore)
            }

            Action::CloseAndUnload => {
                self.platform.notify(HostNotification::CloseAndUnload, payload);
                Some(DispatchExit::ResumeAll)
            }

            Action::ChangeCore => self.handle_change_core(core, payload),

            Action::FlushBuffers => {
                let (vmx_root_flushed, vmx_non_root_flushed) = self.platform.flush_log_buffers();
                let packet = FlushPacket {
                    vmx_root_flushed: U32::new(vmx_root_flushed),
                    vmx_non_root_flushed: U32::new(vmx_non_root_flushed),
                    result: U32::new(Status::Success.to_u32()),
                };
                self.send_response(Action::ResultOfFlush, packet.as_bytes(), &[]);
                None
            }

            Action::ReadRegisters => {
                self.handle_read_registers(registers, payload);
                None
            }

            Action::ChangeProcess => self.handle_change_process(core, payload),

            Action::RunScript => {
                self.handle_run_script(core, registers, payload);
                None
            }

            Action::UserInput => {
                match BufferPacket::parse(payload) {
                    Some((_, input)) => self.platform.notify(HostNotification::UserInput, input),
                    None => warn!("Core {}: malformed user input dropped", core),
                }
                Some(DispatchExit::ResumeAll)
            }

            Action::RegisterEvent => Some(self.forward_with_suppression(
                HostNotification::RegisterEvent,
                payload,
                Action::ResultOfRegisteringEvent,
            )),

            Action::AddActionToEvent => Some(self.forward_with_suppression(
                HostNotification::AddActionToEvent,
                payload,
                Action::ResultOfAddingActionToEvent,
            )),

            Action::QueryAndModifyEvent => self.handle_modify_event(core, payload),

            _ => {
                warn!("Core {}: {:?} is not a debugger command, ignored", core, action);
                None
            }
        }
    }

    fn handle_change_core(&self, core: usize, payload: &[u8]) -> Option<DispatchExit> {
        let Ok((mut packet, _)) = ChangeCorePacket::read_from_prefix(payload) else {
            warn!("Core {}: malformed change core request", core);
            return None;
        };

        let target = packet.new_core.get() as usize;
        if target == core {
            packet.result = U32::new(Status::Success.to_u32());
            self.send_response(Action::ResultOfChangingCore, packet.as_bytes(), &[]);
            return None;
        }

        match self.switch_operating_core(core, target) {
            Ok(()) => {
                packet.result = U32::new(Status::Success.to_u32());
                self.send_response(Action::ResultOfChangingCore, packet.as_bytes(), &[]);
                Some(DispatchExit::CoreSwitched(target))
            }
            Err(status) => {
                warn!("Core {}: cannot switch to core {}", core, target);
                packet.result = U32::new(status.to_u32());
                self.send_response(Action::ResultOfChangingCore, packet.as_bytes(), &[]);
                None
            }
        }
    }

    fn handle_read_registers(&self, registers: &GuestRegisters, payload: &[u8]) {
        let Ok((mut packet, _)) = RegisterReadPacket::read_from_prefix(payload) else {
            warn!("Malformed register read request");
            return;
        };

        let register_id = packet.register_id.get();
        if register_id == ALL_REGISTERS {
            packet.value = U64::new(0);
            packet.result = U32::new(Status::Success.to_u32());
            let block = registers.to_block();
            self.send_response(Action::ResultOfReadingRegisters, packet.as_bytes(), block.as_bytes());
            return;
        }

        let (value, status) = match RegisterId::from_u32(register_id) {
            Some(register) => (registers.read(register), Status::Success),
            None => (0, Status::InvalidRegisterNumber),
        };
        packet.value = U64::new(value);
        packet.result = U32::new(status.to_u32());
        self.send_response(Action::ResultOfReadingRegisters, packet.as_bytes(), &[]);
    }

    fn handle_change_process(&self, core: usize, payload: &[u8]) -> Option<DispatchExit> {
        let Ok((mut packet, _)) = ChangeProcessPacket::read_from_prefix(payload) else {
            warn!("Core {}: malformed change process request", core);
            return None;
        };

        match ChangeProcessAction::from_u32(packet.action.get()) {
            Some(ChangeProcessAction::Query) => {
                packet.process_id = U32::new(self.platform.current_process_id());
                packet.result = U32::new(Status::Success.to_u32());
                self.send_response(Action::ResultOfChangingProcess, packet.as_bytes(), &[]);
                None
            }
            Some(ChangeProcessAction::Switch) => {
                let process_id = packet.process_id.get();
                if !self.platform.process_exists(process_id) {
                    error!("Core {}: process {} does not exist", core, process_id);
                    packet.result = U32::new(Status::InvalidProcessId.to_u32());
                    self.send_response(Action::ResultOfChangingProcess, packet.as_bytes(), &[]);
                    self.platform.diagnostic_break();
                    return None;
                }

                self.queue_process_switch(core, process_id);
                packet.result = U32::new(Status::Success.to_u32());
                self.send_response(Action::ResultOfChangingProcess, packet.as_bytes(), &[]);
                Some(DispatchExit::ResumeAll)
            }
            None => {
                packet.result = U32::new(Status::InvalidActionType.to_u32());
                self.send_response(Action::ResultOfChangingProcess, packet.as_bytes(), &[]);
                None
            }
        }
    }

    fn handle_run_script(&self, core: usize, registers: &GuestRegisters, payload: &[u8]) {
        let Some((mut packet, script)) = BufferPacket::parse(payload) else {
            warn!("Core {}: malformed script packet", core);
            return;
        };

        let event = self.halt_context().event;
        let status = if self.platform.run_script(core, registers, event, script) {
            Status::Success
        } else {
            Status::ScriptFailed
        };

        // The reply carries no script text.
        packet.length = U32::new(0);
        packet.result = U32::new(status.to_u32());
        self.send_response(Action::ResultOfRunningScript, packet.as_bytes(), &[]);
    }

    fn handle_modify_event(&self, core: usize, payload: &[u8]) -> Option<DispatchExit> {
        let Ok((mut packet, _)) = ModifyEventPacket::read_from_prefix(payload) else {
            warn!("Core {}: malformed event modification request", core);
            return None;
        };

        let Some(action) = ModifyEventAction::from_u32(packet.action.get()) else {
            packet.result = U32::new(Status::InvalidActionType.to_u32());
            self.send_response(Action::ResultOfQueryAndModifyEvent, packet.as_bytes(), &[]);
            return None;
        };

        let tag = packet.tag.get();
        let all_events = tag == ALL_EVENTS_TAG;
        let valid_tag = match action {
            // The wildcard has no single state to report.
            ModifyEventAction::Query => !all_events && self.platform.event_exists(tag),
            _ => all_events || self.platform.event_exists(tag),
        };
        if !valid_tag {
            packet.result = U32::new(Status::InvalidEventTag.to_u32());
            self.send_response(Action::ResultOfQueryAndModifyEvent, packet.as_bytes(), &[]);
            return None;
        }

        match action {
            ModifyEventAction::Query => {
                packet.is_enabled = u8::from(self.platform.is_event_enabled(tag));
            }
            ModifyEventAction::Enable | ModifyEventAction::Disable => {
                let enable = action == ModifyEventAction::Enable;
                if all_events {
                    self.platform.set_all_events_enabled(enable);
                } else {
                    self.platform.set_event_enabled(tag, enable);
                }
            }
            ModifyEventAction::Clear => {
                return Some(self.forward_with_suppression(
                    HostNotification::ClearEvent,
                    payload,
                    Action::ResultOfQueryAndModifyEvent,
                ));
            }
        }

        packet.result = U32::new(Status::Success.to_u32());
        self.send_response(Action::ResultOfQueryAndModifyEvent, packet.as_bytes(), &[]);
        None
    }

    /// Hands `payload` to the host and resumes, hiding halts until the host's result for
    /// the operation has been sent.
    fn forward_with_suppression(&self, notification: HostNotification, payload: &[u8], until: Action) -> DispatchExit {
        self.suppression.arm(until);
        self.platform.notify(notification, payload);
        debug!("{:?} forwarded, halts suppressed until {:?}", notification, until);
        DispatchExit::ResumeAll
    }
}
