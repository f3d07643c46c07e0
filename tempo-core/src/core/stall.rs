//! Suspend/resume contract between a hart and the subsystems it waits on.
//!
//! A handler that cannot complete yet registers a [`PendingOperation`] and returns. The hart is
//! then not dispatched until the owning subsystem calls [`Stall::resume`] with the ticket of that
//! operation. The next dispatch replays the same handler with
//! [`ExecutionContext::Replaying`], carrying the data the subsystem delivered.

use super::handle::HandleId;
use super::offload::OffloadResponse;
use crate::registers::Specifier;
use crate::{HartId, ProtocolViolation};
use log::{debug, warn};

/// Identifies one suspension. Tickets are never reused by a hart.
pub type Ticket = u64;

/// What a resumed handler receives.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResumeData {
    /// A blocked memory access completed. `data` holds the loaded value (zero for stores).
    Memory { data: u32 },
    /// The offload channel's ready line went high.
    Ready,
    /// The accelerator answered the outstanding offload request.
    Offload(OffloadResponse),
    /// An interruptible wait was cancelled by a pending interrupt.
    Interrupted,
}

/// Whether a handler runs for the first time or continues a suspended execution.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExecutionContext {
    Fresh,
    Replaying(ResumeData),
}

/// What a suspended hart waits for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PendingKind {
    Load { dest: Specifier },
    Store,
    EventLoad { dest: Specifier },
    OffloadReady,
    OffloadResponse { dest: Specifier },
    WaitForInterrupt,
}

impl PendingKind {
    fn accepts(&self, data: &ResumeData) -> bool {
        matches!(
            (self, data),
            (
                PendingKind::Load { .. } | PendingKind::Store | PendingKind::EventLoad { .. },
                ResumeData::Memory { .. }
            ) | (PendingKind::OffloadReady, ResumeData::Ready)
                | (
                    PendingKind::OffloadResponse { .. },
                    ResumeData::Offload(_)
                )
        )
    }

    /// Returns `true` if a subsystem will eventually resume this operation by ticket.
    fn completes_externally(&self) -> bool {
        !matches!(self, PendingKind::WaitForInterrupt)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PendingOperation {
    pub pc: u32,
    pub handle: HandleId,
    pub ticket: Ticket,
    pub kind: PendingKind,
    /// If `true`, a deliverable interrupt cancels the wait (see [`Stall::interrupt`]).
    pub interruptible: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum State {
    Running,
    Suspended(PendingOperation),
    /// Resumed, but the continuation hasn't been replayed yet.
    Resumed(PendingOperation, ResumeData),
}

/// Per-hart stall state machine: `Running -> Suspended -> Resumed -> Running`.
#[derive(Debug, Clone)]
pub struct Stall {
    hart: HartId,
    state: State,
    next_ticket: Ticket,
    /// Tickets of interrupted operations whose completion may still arrive.
    cancelled: Vec<Ticket>,
}

impl Stall {
    pub fn new(hart: HartId) -> Self {
        Self {
            hart,
            state: State::Running,
            next_ticket: 0,
            cancelled: Vec::new(),
        }
    }

    /// Reserve a ticket for an operation that may be suspended. Must be called before the
    /// operation is issued to a subsystem, which needs the ticket to resume the hart.
    pub fn allocate_ticket(&mut self) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    /// Make the hart non-dispatchable until `operation` is resumed.
    pub fn suspend(&mut self, operation: PendingOperation) -> Result<(), ProtocolViolation> {
        if self.state != State::Running {
            return Err(ProtocolViolation::DoubleSuspend {
                hart: self.hart,
                pc: operation.pc,
            });
        }
        debug!(
            "Hart {} suspended at {:#010x} waiting for {:?} (ticket {})",
            self.hart, operation.pc, operation.kind, operation.ticket
        );
        self.state = State::Suspended(operation);
        Ok(())
    }

    /// Resume the operation identified by `ticket` with `data`.
    ///
    /// Completions of operations that were cancelled by an interrupt are dropped. Every other
    /// ticket that doesn't match the pending operation, or data of the wrong kind, is a
    /// [`ProtocolViolation::SpuriousResume`].
    pub fn resume(&mut self, ticket: Ticket, data: ResumeData) -> Result<(), ProtocolViolation> {
        match self.state {
            State::Suspended(operation)
                if operation.ticket == ticket && operation.kind.accepts(&data) =>
            {
                debug!("Hart {} resumed (ticket {ticket})", self.hart);
                self.state = State::Resumed(operation, data);
                Ok(())
            }
            _ => {
                if let Some(position) = self.cancelled.iter().position(|&t| t == ticket) {
                    self.cancelled.swap_remove(position);
                    warn!(
                        "Hart {} dropped completion of cancelled ticket {ticket}",
                        self.hart
                    );
                    Ok(())
                } else {
                    Err(ProtocolViolation::SpuriousResume {
                        hart: self.hart,
                        ticket,
                    })
                }
            }
        }
    }

    /// Cancel the pending wait if it is interruptible, resuming it with
    /// [`ResumeData::Interrupted`]. Returns `true` if the wait was cancelled.
    pub fn interrupt(&mut self) -> bool {
        match self.state {
            State::Suspended(operation) if operation.interruptible => {
                debug!(
                    "Hart {} wait at {:#010x} interrupted (ticket {})",
                    self.hart, operation.pc, operation.ticket
                );
                if operation.kind.completes_externally() {
                    self.cancelled.push(operation.ticket);
                }
                self.state = State::Resumed(operation, ResumeData::Interrupted);
                true
            }
            _ => false,
        }
    }

    /// Consume the resume data of a resumed operation, returning the context the next handler
    /// invocation runs in.
    pub fn take_context(&mut self) -> ExecutionContext {
        match std::mem::replace(&mut self.state, State::Running) {
            State::Resumed(_, data) => ExecutionContext::Replaying(data),
            State::Running => ExecutionContext::Fresh,
            suspended @ State::Suspended(_) => {
                self.state = suspended;
                ExecutionContext::Fresh
            }
        }
    }

    /// Returns `true` while the hart waits for a resume.
    pub fn is_suspended(&self) -> bool {
        matches!(self.state, State::Suspended(_))
    }

    /// Returns `true` if a resumed operation waits to be replayed.
    pub fn has_continuation(&self) -> bool {
        matches!(self.state, State::Resumed(..))
    }

    /// The operation the hart is suspended on or about to replay.
    pub fn pending(&self) -> Option<&PendingOperation> {
        match &self.state {
            State::Running => None,
            State::Suspended(operation) | State::Resumed(operation, _) => Some(operation),
        }
    }
}
