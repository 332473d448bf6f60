//! The debugger wired to real hardware.
//!
//! VMCS accesses act on the current VMCS, so every [`Vcpu`] call must come from the core it
//! names. Host services and guest memory access are supplied by the hypervisor embedding
//! the debugger through [`HostBridge`].

use {
    crate::{
        config::{DEBUGGER_COM_PORT, LOGGING_LEVEL},
        error::DebuggerError,
        global_const::MAX_CORES,
        intel::{
            capture::GuestRegisters,
            serial::SerialTransport,
            support::{int3, vmcall, vmread, vmwrite, wrmsr},
            vmexit::{mtf::set_monitor_trap_flag, vmcall::VmcallCommand},
        },
        kd::{
            platform::{HostNotification, HostServices, InterruptController, Vcpu},
            state::EventDetails,
            Debugger,
        },
        logger::init_uart_logger,
    },
    log::*,
    spin::Once,
    x86::{
        msr::IA32_X2APIC_ICR,
        vmx::vmcs::{guest, ro},
    },
};

/// x2APIC ICR value for an NMI to a single destination.
const ICR_DELIVERY_MODE_NMI: u64 = 0b100 << 8;
const ICR_LEVEL_ASSERT: u64 = 1 << 14;

/// Everything the embedding hypervisor provides besides VMX and the APIC.
pub trait HostBridge: HostServices + Sync {
    /// Reads guest virtual memory of the current core without faulting.
    fn read_guest_memory(&self, address: u64, buffer: &mut [u8]) -> bool;
}

pub struct VmxPlatform {
    host: &'static dyn HostBridge,
    apic_ids: [u32; MAX_CORES],
    processor_count: usize,
}

impl VmxPlatform {
    /// Creates the platform for the cores whose x2APIC ids are given in core order.
    pub fn new(host: &'static dyn HostBridge, apic_ids: &[u32]) -> Result<Self, DebuggerError> {
        if apic_ids.is_empty() {
            return Err(DebuggerError::NoProcessors);
        }
        if apic_ids.len() > MAX_CORES {
            return Err(DebuggerError::TooManyProcessors(apic_ids.len()));
        }

        let mut ids = [0u32; MAX_CORES];
        ids[..apic_ids.len()].copy_from_slice(apic_ids);

        Ok(Self {
            host,
            apic_ids: ids,
            processor_count: apic_ids.len(),
        })
    }
}

impl Vcpu for VmxPlatform {
    fn guest_rflags(&self, _core: usize) -> u64 {
        vmread(guest::RFLAGS)
    }

    fn set_guest_rflags(&self, _core: usize, rflags: u64) {
        vmwrite(guest::RFLAGS, rflags);
    }

    fn exit_instruction_length(&self, _core: usize) -> usize {
        vmread(ro::VMEXIT_INSTRUCTION_LEN) as usize
    }

    fn set_monitor_trap_flag(&self, _core: usize, enable: bool) {
        set_monitor_trap_flag(enable);
    }

    fn read_guest_memory(&self, _core: usize, address: u64, buffer: &mut [u8]) -> bool {
        self.host.read_guest_memory(address, buffer)
    }

    fn vmcall(&self, command: VmcallCommand) {
        vmcall(command as u64);
    }
}

impl InterruptController for VmxPlatform {
    fn processor_count(&self) -> usize {
        self.processor_count
    }

    fn send_nmi(&self, core: usize) {
        let Some(apic_id) = self.apic_ids[..self.processor_count].get(core) else {
            error!("No APIC id for core {}", core);
            return;
        };

        wrmsr(IA32_X2APIC_ICR, ((*apic_id as u64) << 32) | ICR_LEVEL_ASSERT | ICR_DELIVERY_MODE_NMI);
    }
}

impl HostServices for VmxPlatform {
    fn notify(&self, notification: HostNotification, buffer: &[u8]) {
        self.host.notify(notification, buffer);
    }

    fn flush_log_buffers(&self) -> (u32, u32) {
        self.host.flush_log_buffers()
    }

    fn run_script(&self, core: usize, registers: &GuestRegisters, event: Option<EventDetails>, script: &[u8]) -> bool {
        self.host.run_script(core, registers, event, script)
    }

    fn event_exists(&self, tag: u64) -> bool {
        self.host.event_exists(tag)
    }

    fn is_event_enabled(&self, tag: u64) -> bool {
        self.host.is_event_enabled(tag)
    }

    fn set_event_enabled(&self, tag: u64, enabled: bool) {
        self.host.set_event_enabled(tag, enabled);
    }

    fn set_all_events_enabled(&self, enabled: bool) {
        self.host.set_all_events_enabled(enabled);
    }

    fn current_process_id(&self) -> u32 {
        self.host.current_process_id()
    }

    fn process_exists(&self, process_id: u32) -> bool {
        self.host.process_exists(process_id)
    }

    fn switch_to_process_address_space(&self, process_id: u32) -> u64 {
        self.host.switch_to_process_address_space(process_id)
    }

    fn restore_previous_address_space(&self, token: u64) {
        self.host.restore_previous_address_space(token);
    }

    fn queue_deferred(&self, core: usize) {
        self.host.queue_deferred(core);
    }

    fn diagnostic_break(&self) {
        int3();
    }
}

pub type VmxDebugger = Debugger<VmxPlatform, SerialTransport>;

static DEBUGGER: Once<VmxDebugger> = Once::new();

/// Creates the global debugger on the protocol COM port and announces it to the remote side.
///
/// Installs the UART logger unless the embedding hypervisor already set a logger. Nothing
/// is enabled if initialization fails. Later calls return the existing instance.
pub fn init_debugger(host: &'static dyn HostBridge, apic_ids: &[u32]) -> Result<&'static VmxDebugger, DebuggerError> {
    if !init_uart_logger(LOGGING_LEVEL) {
        debug!("UART logger not installed, using the hypervisor's logger");
    }

    let mut created = false;
    let debugger = DEBUGGER.try_call_once(|| {
        created = true;
        let platform = VmxPlatform::new(host, apic_ids)?;
        Debugger::new(platform, SerialTransport::new(DEBUGGER_COM_PORT))
    })?;

    if created {
        info!("Debugger ready on COM port {:#x}", DEBUGGER_COM_PORT);
        debugger.announce_started();
    }

    Ok(debugger)
}

/// The global debugger, once [`init_debugger`] succeeded.
pub fn debugger() -> Option<&'static VmxDebugger> {
    DEBUGGER.get()
}
