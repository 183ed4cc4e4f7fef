#![no_std]

pub const PAGE_SIZE: usize = 4096;

// The first page handed out to the user heap; program images are linked elsewhere
pub const USER_FREE_ADDRESS_START: usize = 0x0040_0000;

/// Every heap request is rounded up to a multiple of this.
pub const HEAP_ALIGNMENT: usize = 8;

/// Bytes reserved in front of every heap block for its bookkeeping.
pub const BLOCK_HEADER_SIZE: usize = 24;

/// The largest request a single heap block can satisfy.
pub const MAX_HEAP_REQUEST: usize = PAGE_SIZE - BLOCK_HEADER_SIZE;

pub const MAX_FUNCTION_SYMBOLS: usize = 64;

// 31 characters plus the terminator
pub const SYMBOL_NAME_CAPACITY: usize = 32;

/// Name of the string table holding symbol names.
pub const SYMBOL_STRING_TABLE: &str = ".strtab";

pub const MAX_BACKTRACE_DEPTH: usize = 64;
