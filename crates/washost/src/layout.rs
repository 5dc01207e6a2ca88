//! Fixed linear-memory layout shared with the guest SDK.
//!
//! The host writes call input before invoking the guest entrypoint and reads
//! output and chain slots after it returns. Offsets are a fixed convention;
//! both sides compile them in.

/// Exported symbol the executor invokes on the instantiated module.
pub const ENTRYPOINT_FUNC: &str = "run";

pub const MAX_NAME_LENGTH: usize = 20;

pub const INPUT_START: usize = 0;
pub const MAX_INPUT_BYTES: usize = 1024 * 1024;

pub const OUTPUT_START: usize = INPUT_START + MAX_INPUT_BYTES;
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

pub const MAX_CHAINS: usize = 100;
pub const CHAIN_NAMES_START: usize = OUTPUT_START + MAX_OUTPUT_BYTES;
pub const MAX_CHAIN_NAME_BYTES: usize = MAX_NAME_LENGTH * MAX_CHAINS;

pub const CHAIN_DATA_START: usize = CHAIN_NAMES_START + MAX_CHAIN_NAME_BYTES;
pub const MAX_CHAIN_DATA_BYTES: usize = MAX_INPUT_BYTES * MAX_CHAINS;

/// Input and output regions carry an explicit length: a little-endian u32 at
/// the region start, followed by that many payload bytes.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Largest payload fitting a region alongside its length prefix.
pub const MAX_INPUT_PAYLOAD: usize = MAX_INPUT_BYTES - LENGTH_PREFIX_BYTES;
pub const MAX_OUTPUT_PAYLOAD: usize = MAX_OUTPUT_BYTES - LENGTH_PREFIX_BYTES;

pub const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Smallest memory (in pages) able to hold the input and output regions.
/// Guests that chain further functions declare more.
pub const MIN_MEMORY_PAGES: u32 =
    ((OUTPUT_START + MAX_OUTPUT_BYTES + WASM_PAGE_SIZE - 1) / WASM_PAGE_SIZE) as u32;
