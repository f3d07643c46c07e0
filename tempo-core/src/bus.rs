//! Defines a generalization of a TileLink-like bus interface.

use crate::Cycle;
use std::fmt::Debug;

/// A generalization of a TileLink-like bus interface, without the hardware details.
///
/// Implementors of this trait should see it as the TileLink *slave* interface they are exposing,
/// while this interfaces serves as the TileLink *master* interface to callers of this trait.
///
/// The concept is based on what is possible using the TileLink bus interface, but with the
/// following differences:
/// - Access sizes need not be a power of two.
/// - Addresses need not be naturally aligned to the access size.
/// - There is no max data width, meaning all data is always transferred at once, rather than in
///   chunks with a size depending on the data bus width.
/// - No masking is possible, i.e. the accessed bytes are always continuous.
///
/// Addresses are relative to the start of the slave's window. Every `(address, size)` pair must be
/// handled without panics: bytes the slave does not map read as zero and ignore writes.
///
/// Accesses are timed: `now` is the tick at which the access takes effect, which lets
/// time-dependent registers (such as a free-running timer) be evaluated lazily. Whether the
/// access also *completes* at `now` is decided by the master side, see
/// [`crate::core::memory::Memory`].
///
/// Values are serialized in little-endian byte order.
pub trait Bus: Debug {
    /// Invoke a read access for `address` with size `buf.len()`, writing the result to `buf`.
    fn read(&mut self, now: Cycle, address: u32, buf: &mut [u8]);

    /// Invoke a write access for `address` with size `buf.len()`, reading the data from `buf`.
    fn write(&mut self, now: Cycle, address: u32, buf: &[u8]);
}
