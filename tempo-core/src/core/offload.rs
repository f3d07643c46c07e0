//! Ready/valid handshake between a hart and an external accelerator.

use crate::registers::Specifier;
use crate::{ChannelId, ProtocolViolation};
use log::debug;

/// An instruction handed to the accelerator.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OffloadRequest {
    /// Address of the issuing instruction. Responses are tagged with it.
    pub pc: u32,
    /// The raw instruction.
    pub encoding: u32,
    pub kind: u16,
    pub operands: [u32; 2],
    pub dest: Specifier,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OffloadResponse {
    /// Address of the instruction that issued the request being answered.
    pub pc: u32,
    pub dest: Specifier,
    pub value: u32,
    /// The accelerator rejected the request.
    pub error: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelState {
    Idle,
    /// Sent by the hart but not yet picked up by the accelerator.
    RequestSent(OffloadRequest),
    WaitingResponse(OffloadRequest),
}

/// Single-producer single-consumer channel with at most one outstanding request.
#[derive(Debug, Clone)]
pub struct OffloadChannel {
    id: ChannelId,
    state: ChannelState,
    ready: bool,
    completed: u64,
}

impl OffloadChannel {
    /// Create an idle channel with its ready line high.
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            state: ChannelState::Idle,
            ready: true,
            completed: 0,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Drive the ready line. Only the accelerator side does this.
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Number of requests answered so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// The request sent or accepted but not answered yet.
    pub fn outstanding(&self) -> Option<&OffloadRequest> {
        match &self.state {
            ChannelState::Idle => None,
            ChannelState::RequestSent(request) | ChannelState::WaitingResponse(request) => {
                Some(request)
            }
        }
    }

    pub fn send(&mut self, request: OffloadRequest) -> Result<(), ProtocolViolation> {
        if self.state != ChannelState::Idle {
            return Err(ProtocolViolation::OutstandingRequest {
                channel: self.id,
                pc: request.pc,
            });
        }
        if !self.ready {
            return Err(ProtocolViolation::NotReady {
                channel: self.id,
                pc: request.pc,
            });
        }
        debug!(
            "Channel {} sending request {:#06x} from {:#010x}",
            self.id, request.kind, request.pc
        );
        self.state = ChannelState::RequestSent(request);
        Ok(())
    }

    /// Accept the sent request, if any. Called by the accelerator.
    pub fn take_request(&mut self) -> Option<OffloadRequest> {
        match self.state {
            ChannelState::RequestSent(request) => {
                self.state = ChannelState::WaitingResponse(request);
                Some(request)
            }
            _ => None,
        }
    }

    /// Complete the outstanding request with `response`, returning the channel to idle.
    pub fn deliver(&mut self, response: &OffloadResponse) -> Result<(), ProtocolViolation> {
        let Some(outstanding) = self.outstanding() else {
            return Err(ProtocolViolation::UnexpectedResponse {
                channel: self.id,
                got: response.pc,
            });
        };
        if outstanding.pc != response.pc {
            return Err(ProtocolViolation::TagMismatch {
                channel: self.id,
                expected: outstanding.pc,
                got: response.pc,
            });
        }
        self.state = ChannelState::Idle;
        self.completed += 1;
        Ok(())
    }
}
