/// The maximum number of logical processors the debugger keeps state for.
///
/// The per-core table is sized statically so that no allocation happens while cores are
/// halted. Platforms reporting more processors fail initialization.
pub const MAX_CORES: usize = 64;

/// Size of a base page in bytes.
pub const BASE_PAGE_SIZE: usize = 0x1000;

/// The largest framed packet accepted from the debugger, terminator included.
///
/// 10 * 4096 = 40,960 bytes. Anything longer is discarded as an overflow.
pub const MAX_PACKET_SIZE: usize = 10 * BASE_PAGE_SIZE;

/// Interrupt enable flag in RFLAGS.
pub const RFLAGS_IF: u64 = 1 << 9;
