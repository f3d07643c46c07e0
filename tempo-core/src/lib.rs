#[macro_use]
extern crate static_assertions;

use thiserror::Error;

pub mod board;
pub mod bus;
pub mod core;
pub mod instruction;
pub mod interrupt;
pub mod registers;
pub mod resources;
pub mod simulator;

#[cfg(test)]
pub(crate) mod asm;

/// Identifies a hart within a [`board::Board`]. Hart `0` always exists.
pub type HartId = usize;

/// A point in simulated time, counted in board ticks since reset.
pub type Cycle = u64;

/// Identifies an accelerator offload channel. Every hart owns exactly one channel, which carries
/// the id of that hart.
pub type ChannelId = usize;

/// Violation of one of the handshake contracts between a hart and the subsystems that suspend
/// and resume it.
///
/// Unlike an [`core::Exception`], a protocol violation is never visible to the simulated program:
/// it signals a modeling defect in an external collaborator. Continuing would desynchronize
/// simulated time from simulated state, so it is propagated to the host as a fatal error.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ProtocolViolation {
    #[error("hart {hart} suspended at pc {pc:#010x} while already suspended")]
    DoubleSuspend { hart: HartId, pc: u32 },
    #[error("hart {hart} resumed with ticket {ticket} but no matching operation is pending")]
    SpuriousResume { hart: HartId, ticket: u64 },
    #[error(
        "offload channel {channel} received response tagged {got:#010x}, \
         but the outstanding request was issued at {expected:#010x}"
    )]
    TagMismatch {
        channel: ChannelId,
        expected: u32,
        got: u32,
    },
    #[error("offload channel {channel} received a response while no request is outstanding")]
    UnexpectedResponse { channel: ChannelId, got: u32 },
    #[error("offload channel {channel} asked to send a request at {pc:#010x} while one is outstanding")]
    OutstandingRequest { channel: ChannelId, pc: u32 },
    #[error("offload channel {channel} asked to send a request at {pc:#010x} while not ready")]
    NotReady { channel: ChannelId, pc: u32 },
}

/// Rejected platform configuration.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ConfigError {
    #[error("a board needs at least one hart")]
    NoHarts,
    #[error("the CLINT can serve at most {} harts, {0} requested", resources::clint::MAX_HARTS)]
    TooManyHarts(usize),
    #[error("RAM size {0:#x} is not addressable (must be in 1..=1<<32)")]
    InvalidRamSize(usize),
    #[error("RAM at {ram:#010x} overlaps the CLINT window at {clint:#010x}")]
    Overlap { ram: u32, clint: u32 },
    #[error("functional unit `{0}` needs a depth of at least one")]
    ZeroDepth(&'static str),
    #[error("CLINT resolution and tick period must be non-zero")]
    ZeroTimebase,
}

pub mod unit {
    //! Collection of the units in which memory can be addressed (in bytes).

    /// A _byte_ is 8 bits.
    pub const BYTE: u32 = 1;

    /// A _halfword_ is 16 bits (2 bytes).
    pub const HALFWORD: u32 = 2;

    /// A _word_ is 32 bits (4 bytes).
    pub const WORD: u32 = 4;

    /// A _doubleword_ is 64 bits (8 bytes).
    pub const DOUBLEWORD: u32 = 8;
}

/// Address alignment ranging from no alignment (`1`) to `1 << 31` alignment.
// Maintains the invariant that self.0 is a power of two.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alignment(u32);

impl Alignment {
    /// Byte alignment is equivalent to no alignment.
    pub const BYTE: Self = Self(1);

    /// Halfword alignment means the address is a multiple of 2 (`address & 0b1 == 0`).
    pub const HALFWORD: Self = Self(2);

    /// Word alignment means the address is a multiple of 4 (`address & 0b11 == 0`).
    pub const WORD: Self = Self(4);

    /// Doubleword alignment means the address is a multiple of 8 (`address & 0b111 == 0`).
    pub const DOUBLEWORD: Self = Self(8);

    /// Creates the natural alignment for a unit of size `size`. Returns `None` if `size` is not a
    /// power of two.
    pub fn natural_for_size(size: u32) -> Option<Self> {
        size.is_power_of_two().then_some(Self(size))
    }

    /// Returns the alignment as a power of two.
    pub fn as_power_of_two(self) -> u32 {
        self.0
    }

    /// Returns `true` if `address` is aligned to this alignment.
    pub fn is_aligned(self, address: u32) -> bool {
        address & self.0.wrapping_sub(1) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_alignment() {
        assert_eq!(Some(Alignment::WORD), Alignment::natural_for_size(unit::WORD));
        assert_eq!(None, Alignment::natural_for_size(3));
        assert_eq!(None, Alignment::natural_for_size(0));
        assert!(Alignment::HALFWORD.is_aligned(0x1002));
        assert!(!Alignment::WORD.is_aligned(0x1002));
        assert!(Alignment::BYTE.is_aligned(0x1003));
        assert!(Alignment::DOUBLEWORD.is_aligned(0x1008));
    }

    #[test]
    fn protocol_violation_messages_carry_context() {
        let err = ProtocolViolation::TagMismatch {
            channel: 1,
            expected: 0x8000_0010,
            got: 0x8000_0014,
        };
        let message = err.to_string();
        assert!(message.contains("channel 1"));
        assert!(message.contains("0x80000010"));
        assert!(message.contains("0x80000014"));
    }
}
