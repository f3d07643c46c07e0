//! Memory port of a hart.

use super::stall::Ticket;
use crate::{Cycle, HartId};
use thiserror::Error;

/// A data access issued by a hart.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRequest {
    pub hart: HartId,
    /// Ticket to resume the hart with if the access can't complete immediately.
    pub ticket: Ticket,
    pub address: u32,
    /// Access size in bytes, at most 4.
    pub size: u32,
    pub is_write: bool,
    /// Value to store, or the loaded value once a read completed immediately. Only the low
    /// `size` bytes are meaningful.
    pub data: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RequestStatus {
    /// The access completed. For reads, [`MemoryRequest::data`] holds the loaded value.
    Ok,
    /// The access completes later, at which point the memory resumes the issuing hart with the
    /// request's ticket and [`ResumeData::Memory`](super::stall::ResumeData::Memory).
    Blocked,
    /// Nothing can be accessed at this address.
    Invalid,
}

/// Memory as seen from a hart.
pub trait Memory {
    fn issue_request(&mut self, now: Cycle, request: &mut MemoryRequest) -> RequestStatus;

    /// Read the instruction word at `address`, without timing. Returns `None` if no executable
    /// memory is mapped there.
    fn fetch(&mut self, address: u32) -> Option<u32>;
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MemoryError {
    #[error("misaligned access")]
    MisalignedAccess,
    #[error("access fault")]
    AccessFault,
}

/// Outcome of a data access that didn't fail.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum Access {
    Done(u32),
    Blocked(Ticket),
}
