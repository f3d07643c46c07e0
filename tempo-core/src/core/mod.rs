//! A single RV32IM hart with cycle-level timing.
//!
//! Every board tick the hart is [stepped](Hart::step) once. A step either dispatches one
//! instruction, or accounts for a cycle in which the hart is waiting: for the latency of the
//! previous instruction to elapse (busy), or for a subsystem to resume it (stalled).
//!
//! Instructions that can't complete right away (a blocked memory access, a full offload channel,
//! `wfi`) suspend the hart through its [`Stall`](stall::Stall) state machine. Once resumed, the
//! same handler runs again with the data the subsystem delivered. Handlers are written so that
//! running them again has no additional architectural effect.

mod counters;
pub mod csr;
mod execute;
pub mod handle;
pub mod hwloop;
mod interrupts;
pub mod memory;
pub mod occupancy;
pub mod offload;
pub mod stall;
mod trap;

pub use counters::Counters;
pub use trap::Cause;

use self::execute::{Executor, HandlerResult};
use self::handle::HandleCache;
use self::hwloop::LoopController;
use self::interrupts::Interrupts;
use self::memory::Memory;
use self::occupancy::{FunctionalUnit, OccupancyTracker};
use self::offload::{OffloadChannel, OffloadRequest, OffloadResponse};
use self::stall::{PendingKind, PendingOperation, ResumeData, Stall, Ticket};
use self::trap::Trap;
use crate::registers::Registers;
use crate::{Alignment, ConfigError, Cycle, HartId, ProtocolViolation};
use log::{debug, info, trace, warn};

/// Latency and depth of one pipelined functional unit.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FunctionalUnitConfig {
    /// Number of operations that can be in flight at once.
    pub depth: usize,
    /// Cycles between issuing an operation and its result being available.
    pub latency: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub hart_id: HartId,
    /// Initial value of the `pc`.
    pub reset_vector: u32,
    /// Initial value of `mtvec`.
    pub trap_vector: u32,
    /// If `false`, misaligned loads and stores raise an address-misaligned exception.
    pub support_misaligned_memory_access: bool,
    /// If `true`, `ebreak` halts the hart instead of raising a breakpoint exception.
    pub halt_on_ebreak: bool,
    pub multiplier: FunctionalUnitConfig,
    pub divider: FunctionalUnitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hart_id: 0,
            reset_vector: 0x8000_0000,
            trap_vector: 0,
            support_misaligned_memory_access: false,
            halt_on_ebreak: true,
            multiplier: FunctionalUnitConfig {
                depth: 3,
                latency: 3,
            },
            divider: FunctionalUnitConfig {
                depth: 1,
                latency: 34,
            },
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.multiplier.depth == 0 {
            return Err(ConfigError::ZeroDepth("multiplier"));
        }
        if self.divider.depth == 0 {
            return Err(ConfigError::ZeroDepth("divider"));
        }
        Ok(())
    }
}

/// What a hart did during one step.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StepOutcome {
    /// An instruction completed.
    Retired,
    /// The hart is suspended on a pending operation, or just got suspended.
    Stalled,
    /// The latency of a previous instruction hasn't elapsed yet.
    Busy,
    /// A trap was taken, and the `pc` now points to the trap handler.
    Trapped(Cause),
    /// The hart executed `ebreak` with [`Config::halt_on_ebreak`] set and stopped for good.
    Halted,
}

#[derive(Debug)]
pub struct Hart {
    config: Config,
    registers: Registers,
    handles: HandleCache,
    stall: Stall,
    loops: LoopController,
    multiplier: OccupancyTracker,
    divider: OccupancyTracker,
    offload: OffloadChannel,
    interrupts: Interrupts,
    trap: Trap,
    counters: Counters,
    /// First cycle at which the next instruction may be dispatched.
    busy_until: Cycle,
    halted: bool,
}

impl Hart {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registers: Registers::new(config.reset_vector),
            handles: HandleCache::new(),
            stall: Stall::new(config.hart_id),
            loops: LoopController::new(),
            multiplier: OccupancyTracker::new(config.multiplier.depth),
            divider: OccupancyTracker::new(config.divider.depth),
            offload: OffloadChannel::new(config.hart_id),
            interrupts: Interrupts::new(),
            trap: Trap::new(config.trap_vector),
            counters: Counters::new(),
            busy_until: 0,
            halted: false,
            config,
        })
    }

    /// Return to the state right after construction.
    pub fn reset(&mut self) {
        let config = self.config.clone();
        // Config was validated on construction.
        if let Ok(hart) = Self::new(config) {
            *self = hart;
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn id(&self) -> HartId {
        self.config.hart_id
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn loops(&self) -> &LoopController {
        &self.loops
    }

    pub fn handles(&self) -> &HandleCache {
        &self.handles
    }

    pub fn occupancy(&self, unit: FunctionalUnit) -> &OccupancyTracker {
        match unit {
            FunctionalUnit::Multiplier => &self.multiplier,
            FunctionalUnit::Divider => &self.divider,
        }
    }

    fn occupancy_mut(&mut self, unit: FunctionalUnit) -> &mut OccupancyTracker {
        match unit {
            FunctionalUnit::Multiplier => &mut self.multiplier,
            FunctionalUnit::Divider => &mut self.divider,
        }
    }

    pub fn offload_channel(&self) -> &OffloadChannel {
        &self.offload
    }

    /// Number of traps taken since reset.
    pub fn traps_taken(&self) -> u64 {
        self.trap.taken()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_suspended(&self) -> bool {
        self.stall.is_suspended()
    }

    /// The operation the hart is suspended on, or whose continuation hasn't run yet.
    pub fn pending_operation(&self) -> Option<&PendingOperation> {
        self.stall.pending()
    }

    /// Resume the pending operation identified by `ticket`.
    pub fn resume(&mut self, ticket: Ticket, data: ResumeData) -> Result<(), ProtocolViolation> {
        self.stall.resume(ticket, data)
    }

    /// Value of `mip`.
    pub fn pending_interrupts(&self) -> u32 {
        self.interrupts.read_mip()
    }

    /// Drive the line of `interrupt` to `level`.
    pub fn set_interrupt_line(&mut self, interrupt: Interrupt, level: bool) {
        if self.interrupts.is_pending(interrupt) != level {
            trace!(
                "Hart {} {interrupt:?} line {}",
                self.config.hart_id,
                if level { "raised" } else { "lowered" }
            );
        }
        self.interrupts.set_pending(interrupt, level);
        self.poll_wakeup();
    }

    /// Drive the ready line of the hart's offload channel. A rising edge resumes a hart that is
    /// waiting to issue an offload request.
    pub fn set_offload_ready(&mut self, ready: bool) -> Result<(), ProtocolViolation> {
        self.offload.set_ready(ready);
        if !ready || !self.stall.is_suspended() {
            return Ok(());
        }
        match self.stall.pending() {
            Some(&PendingOperation {
                ticket,
                kind: PendingKind::OffloadReady,
                ..
            }) => self.stall.resume(ticket, ResumeData::Ready),
            _ => Ok(()),
        }
    }

    /// Take the request the hart sent on its offload channel, if any.
    pub fn take_offload_request(&mut self) -> Option<OffloadRequest> {
        self.offload.take_request()
    }

    /// Answer the outstanding offload request and resume the hart waiting for it.
    pub fn deliver_offload_response(
        &mut self,
        response: OffloadResponse,
    ) -> Result<(), ProtocolViolation> {
        self.offload.deliver(&response)?;
        match self.stall.pending().map(|operation| operation.ticket) {
            Some(ticket) => self.stall.resume(ticket, ResumeData::Offload(response)),
            None => Err(ProtocolViolation::UnexpectedResponse {
                channel: self.offload.id(),
                got: response.pc,
            }),
        }
    }

    /// Wake up a hart whose wait is ended by a pending interrupt.
    ///
    /// `wfi` ends as soon as an enabled interrupt is pending, even if `mstatus.MIE` is clear.
    /// Other interruptible waits only end if the interrupt will actually be taken.
    fn poll_wakeup(&mut self) {
        if !self.stall.is_suspended() || self.interrupts.pending_enabled() == 0 {
            return;
        }
        let wake = match self.stall.pending() {
            Some(operation) if operation.kind == PendingKind::WaitForInterrupt => true,
            Some(operation) => operation.interruptible && self.trap.interrupts_enabled(),
            None => false,
        };
        if wake {
            self.stall.interrupt();
        }
    }

    /// Advance the hart by one cycle.
    ///
    /// Only a [`ProtocolViolation`] is returned as an error. Exceptions raised by the program are
    /// handled by trapping, which is reported as [`StepOutcome::Trapped`].
    pub fn step<M: Memory>(
        &mut self,
        now: Cycle,
        memory: &mut M,
    ) -> Result<StepOutcome, ProtocolViolation> {
        if self.halted {
            return Ok(StepOutcome::Halted);
        }
        self.counters.increment_cycle();
        self.poll_wakeup();

        if self.stall.is_suspended() {
            self.counters.increment_stalled();
            return Ok(StepOutcome::Stalled);
        }
        if now < self.busy_until {
            self.counters.increment_busy();
            return Ok(StepOutcome::Busy);
        }

        let pc = self.registers.pc();
        if !self.stall.has_continuation() && self.trap.interrupts_enabled() {
            if let Some(interrupt) = self.interrupts.highest_priority() {
                return Ok(self.take_trap(now, pc, Cause::interrupt(interrupt), 0));
            }
        }

        if !Alignment::WORD.is_aligned(pc) {
            let cause = Cause::exception(Exception::InstructionAddressMisaligned);
            return Ok(self.take_trap(now, pc, cause, pc));
        }
        let Some((id, handle)) = self
            .handles
            .get_or_fetch(pc, |address| memory.fetch(address))
        else {
            let cause = Cause::exception(Exception::InstructionAccessFault);
            return Ok(self.take_trap(now, pc, cause, pc));
        };
        handle.count_execution();
        let raw = handle.raw();
        let instruction = match handle.decoded() {
            Ok(instruction) => *instruction,
            Err(err) => {
                debug!("Hart {}: {err} at {pc:#010x}", self.config.hart_id);
                let cause = Cause::exception(Exception::IllegalInstruction);
                return Ok(self.take_trap(now, pc, cause, raw));
            }
        };

        let context = self.stall.take_context();
        trace!(
            "Hart {} executing {instruction:?} at {pc:#010x} ({context:?})",
            self.config.hart_id
        );
        let executor = Executor {
            hart: self,
            memory,
            now,
            pc,
            raw,
            handle: id,
            context,
        };
        let result = executor.execute(instruction)?;

        Ok(match result {
            HandlerResult::Completed { next_pc, latency } => {
                self.registers.set_pc(next_pc);
                self.busy_until = now + Cycle::from(latency.max(1));
                self.counters.increment_instret();
                self.loops.retire();
                StepOutcome::Retired
            }
            HandlerResult::Stalled => {
                if let Some(handle) = self.handles.get_mut(id) {
                    handle.mark_stalled();
                }
                self.counters.increment_stalled();
                StepOutcome::Stalled
            }
            HandlerResult::Exception { exception, tval } => {
                self.loops.rollback();
                self.take_trap(now, pc, Cause::exception(exception), tval)
            }
            HandlerResult::Interrupted => {
                self.loops.release();
                match self.interrupts.highest_priority() {
                    Some(interrupt) if self.trap.interrupts_enabled() => {
                        self.take_trap(now, pc, Cause::interrupt(interrupt), 0)
                    }
                    _ => {
                        warn!(
                            "Hart {} wait at {pc:#010x} interrupted without a deliverable interrupt",
                            self.config.hart_id
                        );
                        StepOutcome::Stalled
                    }
                }
            }
            HandlerResult::Halted => {
                self.halted = true;
                self.counters.increment_instret();
                self.loops.retire();
                info!("Hart {} halted at {pc:#010x}", self.config.hart_id);
                StepOutcome::Halted
            }
        })
    }

    fn take_trap(&mut self, now: Cycle, pc: u32, cause: Cause, tval: u32) -> StepOutcome {
        let handler = self.trap.enter(pc, cause, tval);
        self.registers.set_pc(handler);
        self.busy_until = now + 1;
        StepOutcome::Trapped(cause)
    }
}

/// Synchronous exceptions this hart can raise, with their `mcause` codes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Exception {
    InstructionAddressMisaligned,
    InstructionAccessFault,
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromMMode,
}

impl Exception {
    pub const fn code(self) -> u32 {
        match self {
            Exception::InstructionAddressMisaligned => 0,
            Exception::InstructionAccessFault => 1,
            Exception::IllegalInstruction => 2,
            Exception::Breakpoint => 3,
            Exception::LoadAddressMisaligned => 4,
            Exception::LoadAccessFault => 5,
            Exception::StoreOrAmoAddressMisaligned => 6,
            Exception::StoreOrAmoAccessFault => 7,
            Exception::EnvironmentCallFromMMode => 11,
        }
    }
}

/// Machine-level interrupts. The discriminant is the bit in `mip`/`mie` and the `mcause` code.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Interrupt {
    MachineSoftwareInterrupt = 3,
    MachineTimerInterrupt = 7,
    MachineExternalInterrupt = 11,
}

impl Interrupt {
    pub const fn code(self) -> u32 {
        self as u32
    }
}
