//! Memory model of the observed program
//!
//! This module provides the core bookkeeping:
//! - [`value`]: the value formatter every observer and heap record renders through
//! - [`heap`]: the tracked allocator and its table of live allocation records
//! - [`stack`]: the call stack with recursion-aware activation labels
//! - [`observer`]: the registry of currently observable variables
//!
//! # Addresses
//!
//! Addresses are the real addresses of the observed storage, so a pointer's
//! target address and the address of the heap record it points into always
//! agree. They are written as lowercase hex with a `0x` prefix; `0` means
//! "no target".

pub mod heap;
pub mod observer;
pub mod stack;
pub mod value;

/// Memory address type (64-bit)
pub type Address = u64;

/// Render an address the way the snapshot protocol writes it
pub fn format_address(address: Address) -> String {
    format!("{:#x}", address)
}
