//! In-memory platform and transport for tests.

use {
    super::{
        codec::write_packet,
        platform::{HostNotification, HostServices, InterruptController, Transport, Vcpu},
        state::EventDetails,
    },
    crate::intel::{capture::GuestRegisters, vmexit::vmcall::VmcallCommand},
    shared::{Action, PacketHeader, PacketType, HEADER_SIZE, TERMINATOR},
    std::{
        collections::{BTreeMap, VecDeque},
        sync::{
            atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
            Arc, Mutex,
        },
        vec::Vec,
    },
    zerocopy::FromBytes,
};

/// Loopback transport. Clones share both directions, so a test keeps one handle while the
/// debugger owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inbound: Arc<Mutex<VecDeque<u8>>>,
    outbound: Arc<Mutex<Vec<u8>>>,
}

/// One packet sent by the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub action: Action,
    pub payload: Vec<u8>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a well-formed command from the debugger.
    pub fn push_command(&self, action: Action, payload: &[u8]) {
        let mut encoder = MockTransport::new();
        write_packet(&mut encoder, PacketType::DebuggerToDebuggeeVmxRoot, action, payload, &[]);
        self.push_raw(&encoder.take_sent());
    }

    pub fn push_raw(&self, bytes: &[u8]) {
        self.inbound.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Everything sent so far, as raw bytes.
    pub fn take_sent(&self) -> Vec<u8> {
        core::mem::take(&mut *self.outbound.lock().unwrap())
    }

    /// Everything sent so far, split into packets.
    pub fn take_packets(&self) -> Vec<SentPacket> {
        let sent = self.take_sent();
        let mut packets = Vec::new();
        let mut start = 0;

        for end in 0..sent.len() {
            if end + 1 - start >= HEADER_SIZE + TERMINATOR.len() && sent[end + 1 - TERMINATOR.len()..=end] == TERMINATOR {
                let frame = &sent[start..end + 1 - TERMINATOR.len()];
                let (header, payload) = PacketHeader::read_from_prefix(frame).unwrap();
                assert_eq!(header.packet_type.get(), PacketType::DebuggeeToDebugger as u32);
                assert_eq!(header.checksum, header.compute_checksum(&[payload]));
                packets.push(SentPacket {
                    action: Action::from_u32(header.action.get()).unwrap(),
                    payload: payload.to_vec(),
                });
                start = end + 1;
            }
        }

        assert_eq!(start, sent.len(), "trailing bytes without terminator");
        packets
    }
}

impl Transport for MockTransport {
    fn send(&mut self, bytes: &[u8]) {
        self.outbound.lock().unwrap().extend_from_slice(bytes);
    }

    fn receive_byte(&mut self) -> Option<u8> {
        self.inbound.lock().unwrap().pop_front()
    }
}

/// Collaborator calls recorded by [`MockPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Notify(HostNotification, Vec<u8>),
    RunScript {
        core: usize,
        event: Option<EventDetails>,
        script: Vec<u8>,
    },
    QueueDeferred(usize),
    DiagnosticBreak,
    SwitchAddressSpace(u32),
    RestoreAddressSpace(u64),
    Vmcall(VmcallCommand),
}

pub struct MockPlatform {
    processor_count: usize,
    rflags: Vec<AtomicU64>,
    rflags_writes: Vec<AtomicUsize>,
    monitor_trap: Vec<AtomicBool>,
    nmis: Vec<AtomicUsize>,
    instruction_length: AtomicUsize,
    code: Mutex<Option<(u64, Vec<u8>)>>,
    calls: Mutex<Vec<MockCall>>,
    events: Mutex<BTreeMap<u64, bool>>,
    current_process: AtomicU32,
    processes: Mutex<Vec<u32>>,
    script_result: AtomicBool,
    flush_result: Mutex<(u32, u32)>,
}

impl MockPlatform {
    pub fn new(processor_count: usize) -> Self {
        let per_core = |value: u64| (0..processor_count.max(1)).map(|_| AtomicU64::new(value)).collect();
        let counters = || (0..processor_count.max(1)).map(|_| AtomicUsize::new(0)).collect();

        Self {
            processor_count,
            rflags: per_core(0x2),
            rflags_writes: counters(),
            monitor_trap: (0..processor_count.max(1)).map(|_| AtomicBool::new(false)).collect(),
            nmis: counters(),
            instruction_length: AtomicUsize::new(0),
            code: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(BTreeMap::new()),
            current_process: AtomicU32::new(0),
            processes: Mutex::new(Vec::new()),
            script_result: AtomicBool::new(true),
            flush_result: Mutex::new((0, 0)),
        }
    }

    /// Sets RFLAGS of `core` without counting it as a write by the debugger.
    pub fn preset_rflags(&self, core: usize, rflags: u64) {
        self.rflags[core].store(rflags, Ordering::SeqCst);
    }

    pub fn rflags_writes(&self, core: usize) -> usize {
        self.rflags_writes[core].load(Ordering::SeqCst)
    }

    pub fn monitor_trap_flag(&self, core: usize) -> bool {
        self.monitor_trap[core].load(Ordering::SeqCst)
    }

    pub fn nmi_count(&self, core: usize) -> usize {
        self.nmis[core].load(Ordering::SeqCst)
    }

    /// Consumes one pending NMI of `core`.
    pub fn take_nmi(&self, core: usize) -> bool {
        self.nmis[core]
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
            .is_ok()
    }

    pub fn set_instruction_length(&self, length: usize) {
        self.instruction_length.store(length, Ordering::SeqCst);
    }

    /// Makes `bytes` readable at `address`; everything else is unreadable.
    pub fn set_code(&self, address: u64, bytes: &[u8]) {
        *self.code.lock().unwrap() = Some((address, bytes.to_vec()));
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn add_event(&self, tag: u64, enabled: bool) {
        self.events.lock().unwrap().insert(tag, enabled);
    }

    pub fn event_enabled(&self, tag: u64) -> bool {
        self.events.lock().unwrap().get(&tag).copied().unwrap_or(false)
    }

    pub fn set_processes(&self, current: u32, processes: &[u32]) {
        self.current_process.store(current, Ordering::SeqCst);
        *self.processes.lock().unwrap() = processes.to_vec();
    }

    pub fn set_script_result(&self, result: bool) {
        self.script_result.store(result, Ordering::SeqCst);
    }

    pub fn set_flush_result(&self, vmx_root: u32, vmx_non_root: u32) {
        *self.flush_result.lock().unwrap() = (vmx_root, vmx_non_root);
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Vcpu for MockPlatform {
    fn guest_rflags(&self, core: usize) -> u64 {
        self.rflags[core].load(Ordering::SeqCst)
    }

    fn set_guest_rflags(&self, core: usize, rflags: u64) {
        self.rflags_writes[core].fetch_add(1, Ordering::SeqCst);
        self.rflags[core].store(rflags, Ordering::SeqCst);
    }

    fn exit_instruction_length(&self, _core: usize) -> usize {
        self.instruction_length.load(Ordering::SeqCst)
    }

    fn set_monitor_trap_flag(&self, core: usize, enable: bool) {
        self.monitor_trap[core].store(enable, Ordering::SeqCst);
    }

    fn read_guest_memory(&self, _core: usize, address: u64, buffer: &mut [u8]) -> bool {
        let code = self.code.lock().unwrap();
        let Some((base, bytes)) = code.as_ref() else {
            return false;
        };
        let Some(offset) = address.checked_sub(*base) else {
            return false;
        };

        // Bytes past the known region read as zero, like an adjacent mapped page.
        buffer.fill(0);
        let available = bytes.get(offset as usize..).unwrap_or(&[]);
        let count = available.len().min(buffer.len());
        buffer[..count].copy_from_slice(&available[..count]);
        offset < bytes.len() as u64
    }

    fn vmcall(&self, command: VmcallCommand) {
        self.record(MockCall::Vmcall(command));
    }
}

impl InterruptController for MockPlatform {
    fn processor_count(&self) -> usize {
        self.processor_count
    }

    fn send_nmi(&self, core: usize) {
        self.nmis[core].fetch_add(1, Ordering::SeqCst);
    }
}

impl HostServices for MockPlatform {
    fn notify(&self, notification: HostNotification, buffer: &[u8]) {
        self.record(MockCall::Notify(notification, buffer.to_vec()));
    }

    fn flush_log_buffers(&self) -> (u32, u32) {
        *self.flush_result.lock().unwrap()
    }

    fn run_script(&self, core: usize, _registers: &GuestRegisters, event: Option<EventDetails>, script: &[u8]) -> bool {
        self.record(MockCall::RunScript {
            core,
            event,
            script: script.to_vec(),
        });
        self.script_result.load(Ordering::SeqCst)
    }

    fn event_exists(&self, tag: u64) -> bool {
        self.events.lock().unwrap().contains_key(&tag)
    }

    fn is_event_enabled(&self, tag: u64) -> bool {
        self.event_enabled(tag)
    }

    fn set_event_enabled(&self, tag: u64, enabled: bool) {
        if let Some(state) = self.events.lock().unwrap().get_mut(&tag) {
            *state = enabled;
        }
    }

    fn set_all_events_enabled(&self, enabled: bool) {
        for state in self.events.lock().unwrap().values_mut() {
            *state = enabled;
        }
    }

    fn current_process_id(&self) -> u32 {
        self.current_process.load(Ordering::SeqCst)
    }

    fn process_exists(&self, process_id: u32) -> bool {
        self.processes.lock().unwrap().contains(&process_id)
    }

    fn switch_to_process_address_space(&self, process_id: u32) -> u64 {
        self.record(MockCall::SwitchAddressSpace(process_id));
        self.current_process.swap(process_id, Ordering::SeqCst) as u64
    }

    fn restore_previous_address_space(&self, token: u64) {
        self.record(MockCall::RestoreAddressSpace(token));
        self.current_process.store(token as u32, Ordering::SeqCst);
    }

    fn queue_deferred(&self, core: usize) {
        self.record(MockCall::QueueDeferred(core));
    }

    fn diagnostic_break(&self) {
        self.record(MockCall::DiagnosticBreak);
    }
}
