//! Reference accelerator attached to the offload channel of one hart.

use crate::core::offload::{OffloadRequest, OffloadResponse};
use crate::core::Hart;
use crate::{Cycle, ProtocolViolation};
use log::{debug, trace};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AcceleratorConfig {
    /// Ticks between accepting a request and answering it. At least one.
    pub latency: u64,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self { latency: 4 }
    }
}

/// Operations understood by the accelerator, selected by the `kind` of a request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    /// Multiply-accumulate into an internal accumulator, which is returned.
    Mac,
    Popcount,
    Min,
    Max,
}

impl Operation {
    pub fn from_kind(kind: u16) -> Option<Self> {
        Some(match kind {
            0 => Self::Add,
            1 => Self::Sub,
            2 => Self::Mul,
            3 => Self::Mac,
            4 => Self::Popcount,
            5 => Self::Min,
            6 => Self::Max,
            _ => return None,
        })
    }
}

/// Single-issue functional unit with a fixed latency.
///
/// While a request is being processed, the ready line of the channel is held low, so the hart
/// waits before it can send the next request.
#[derive(Debug, Clone)]
pub struct Accelerator {
    config: AcceleratorConfig,
    accumulator: u32,
    in_flight: Option<(Cycle, OffloadResponse)>,
    processed: u64,
}

impl Accelerator {
    pub fn new(config: AcceleratorConfig) -> Self {
        Self {
            config,
            accumulator: 0,
            in_flight: None,
            processed: 0,
        }
    }

    /// Drop the request in flight and clear the accumulator.
    pub fn reset(&mut self) {
        self.accumulator = 0;
        self.in_flight = None;
        self.processed = 0;
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Number of requests answered.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Advance to tick `now`: answer the request in flight if it is due, then accept the next
    /// request of `hart`.
    pub fn step(&mut self, now: Cycle, hart: &mut Hart) -> Result<(), ProtocolViolation> {
        if let Some((due, response)) = self.in_flight {
            if due > now {
                return Ok(());
            }
            trace!("Accelerator answering {:#010x} at tick {now}", response.pc);
            self.in_flight = None;
            self.processed += 1;
            hart.deliver_offload_response(response)?;
        }
        if !hart.offload_channel().is_ready() {
            hart.set_offload_ready(true)?;
        }
        if let Some(request) = hart.take_offload_request() {
            let response = self.process(&request);
            let due = now + self.config.latency.max(1);
            debug!(
                "Accelerator accepted kind {:#x} from {:#010x}, answering at tick {due}",
                request.kind, request.pc
            );
            self.in_flight = Some((due, response));
            hart.set_offload_ready(false)?;
        }
        Ok(())
    }

    fn process(&mut self, request: &OffloadRequest) -> OffloadResponse {
        let [a, b] = request.operands;
        let value = Operation::from_kind(request.kind).map(|operation| match operation {
            Operation::Add => a.wrapping_add(b),
            Operation::Sub => a.wrapping_sub(b),
            Operation::Mul => a.wrapping_mul(b),
            Operation::Mac => {
                self.accumulator = self.accumulator.wrapping_add(a.wrapping_mul(b));
                self.accumulator
            }
            Operation::Popcount => a.count_ones(),
            Operation::Min => (a as i32).min(b as i32) as u32,
            Operation::Max => (a as i32).max(b as i32) as u32,
        });
        OffloadResponse {
            pc: request.pc,
            dest: request.dest,
            value: value.unwrap_or(0),
            error: value.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Specifier;

    fn request(kind: u16, operands: [u32; 2]) -> OffloadRequest {
        OffloadRequest {
            pc: 0x8000_0000,
            encoding: 0,
            kind,
            operands,
            dest: Specifier::A0,
        }
    }

    #[test]
    fn operations() {
        let mut accelerator = Accelerator::new(AcceleratorConfig::default());
        let mut compute = |kind, operands| accelerator.process(&request(kind, operands));
        assert_eq!(5, compute(0, [2, 3]).value);
        assert_eq!(u32::MAX, compute(1, [2, 3]).value);
        assert_eq!(6, compute(2, [2, 3]).value);
        assert_eq!(6, compute(3, [2, 3]).value);
        assert_eq!(18, compute(3, [3, 4]).value);
        assert_eq!(3, compute(4, [0b1011, 0]).value);
        assert_eq!(-1i32 as u32, compute(5, [-1i32 as u32, 1]).value);
        assert_eq!(1, compute(6, [-1i32 as u32, 1]).value);
        let unknown = compute(0x7F, [1, 1]);
        assert!(unknown.error);
        assert_eq!(Specifier::A0, unknown.dest);
    }

    #[test]
    fn kinds() {
        assert_eq!(Some(Operation::Max), Operation::from_kind(6));
        assert_eq!(None, Operation::from_kind(7));
    }
}
