use super::handle::{HandleId, Scratch};
use super::memory::{Access, Memory, MemoryError, MemoryRequest, RequestStatus};
use super::occupancy::{FunctionalUnit, OccupancyEntry};
use super::offload::OffloadRequest;
use super::stall::{ExecutionContext, PendingKind, PendingOperation, ResumeData, Ticket};
use super::{Exception, Hart};
use crate::instruction::{
    BranchCondition, CsrOp, CsrSource, Instruction, LoadWidth, LoopOp, MulDivOp, RegImmOp,
    RegRegOp, RegShiftImmOp, StoreWidth,
};
use crate::registers::Specifier;
use crate::{Alignment, Cycle, ProtocolViolation};
use log::trace;

/// How an instruction handler ended.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum HandlerResult {
    /// The instruction completed. The next instruction may issue `latency` cycles from now.
    Completed { next_pc: u32, latency: u32 },
    /// The hart got suspended. The handler runs again once it is resumed.
    Stalled,
    Exception { exception: Exception, tval: u32 },
    /// An interruptible wait was cancelled. The instruction is executed again after the trap.
    Interrupted,
    Halted,
}

type HandlerOutcome = Result<HandlerResult, ProtocolViolation>;

fn exception(exception: Exception, tval: u32) -> HandlerOutcome {
    Ok(HandlerResult::Exception { exception, tval })
}

/// Runs the handler of one instruction of a hart.
///
/// Handlers that may suspend only modify architectural state once they're certain to complete,
/// so running them again after a resume is safe. The successor `pc` of such instructions is
/// resolved through the hardware loop controller *before* the first attempt, which caches it for
/// replays.
pub(super) struct Executor<'h, 'm, M: Memory> {
    pub hart: &'h mut Hart,
    pub memory: &'m mut M,
    pub now: Cycle,
    pub pc: u32,
    pub raw: u32,
    pub handle: HandleId,
    pub context: ExecutionContext,
}

impl<'h, 'm, M: Memory> Executor<'h, 'm, M> {
    pub fn execute(mut self, instruction: Instruction) -> HandlerOutcome {
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => self.reg_imm_op(dest, src, immediate, reg_imm_fn(op)),
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u5,
            } => self.reg_shamt_op(dest, src, shift_amount_u5, reg_shamt_fn(op)),
            Instruction::Auipc { dest, immediate } => {
                let value = self.pc.wrapping_add_signed(immediate & !0xFFF);
                self.write_and_complete(dest, value)
            }
            Instruction::Lui { dest, immediate } => {
                self.write_and_complete(dest, immediate as u32 & !0xFFF)
            }
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => self.reg_reg_op(dest, src1, src2, reg_reg_fn(op)),
            Instruction::MulDiv {
                op,
                dest,
                src1,
                src2,
            } => self.mul_div_op(op, dest, src1, src2),
            Instruction::Jal { dest, offset } => {
                let target = self.pc.wrapping_add_signed(offset);
                self.jump_op(dest, target)
            }
            Instruction::Jalr { dest, base, offset } => {
                let target = self.hart.registers.x(base).wrapping_add_signed(offset) & !1;
                self.jump_op(dest, target)
            }
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => self.cond_branch(src1, src2, offset, branch_predicate(condition)),
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let address = self.hart.registers.x(base).wrapping_add_signed(offset);
                self.load_op(width, dest, address, None)
            }
            Instruction::LoadPostIncrement {
                width,
                dest,
                base,
                offset,
            } => {
                let address = self.hart.registers.x(base);
                self.load_op(width, dest, address, Some((base, offset)))
            }
            Instruction::EventLoad { dest, base, offset } => {
                let address = self.hart.registers.x(base).wrapping_add_signed(offset);
                self.event_load(dest, address)
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                let address = self.hart.registers.x(base).wrapping_add_signed(offset);
                self.store_op(width, src, address)
            }
            // Accesses are performed in program order, so fences are no-ops.
            Instruction::Fence { .. } => self.complete(),
            Instruction::FenceI => {
                let next_pc = self.fall_through();
                self.hart.handles.flush();
                Ok(HandlerResult::Completed {
                    next_pc,
                    latency: 1,
                })
            }
            Instruction::Csr {
                op,
                dest,
                source,
                csr,
            } => self.csr_op(op, dest, source, csr),
            Instruction::Ecall => exception(Exception::EnvironmentCallFromMMode, 0),
            Instruction::Ebreak => {
                if self.hart.config.halt_on_ebreak {
                    Ok(HandlerResult::Halted)
                } else {
                    exception(Exception::Breakpoint, self.pc)
                }
            }
            Instruction::Mret => Ok(HandlerResult::Completed {
                next_pc: self.hart.trap.leave(),
                latency: 1,
            }),
            Instruction::Wfi => self.wfi(),
            Instruction::HwLoop(op) => self.loop_op(op),
            Instruction::Offload {
                kind,
                dest,
                src1,
                src2,
            } => self.offload(kind, dest, src1, src2),
        }
    }

    /// Sequential successor of the executing instruction, taking hardware loops into account.
    fn fall_through(&mut self) -> u32 {
        self.hart.loops.resolve(self.pc)
    }

    fn complete(&mut self) -> HandlerOutcome {
        Ok(HandlerResult::Completed {
            next_pc: self.fall_through(),
            latency: 1,
        })
    }

    fn write_and_complete(&mut self, dest: Specifier, value: u32) -> HandlerOutcome {
        self.hart.registers.set_x(dest, value);
        self.complete()
    }

    fn suspend(&mut self, ticket: Ticket, kind: PendingKind, interruptible: bool) -> HandlerOutcome {
        self.hart.stall.suspend(PendingOperation {
            pc: self.pc,
            handle: self.handle,
            ticket,
            kind,
            interruptible,
        })?;
        Ok(HandlerResult::Stalled)
    }

    fn scratch(&self) -> Scratch {
        self.hart
            .handles
            .get(self.handle)
            .map_or(Scratch::Empty, |handle| handle.scratch)
    }

    fn set_scratch(&mut self, scratch: Scratch) {
        if let Some(handle) = self.hart.handles.get_mut(self.handle) {
            handle.scratch = scratch;
        }
    }

    #[inline]
    fn reg_imm_op(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: fn(u32, i32) -> u32,
    ) -> HandlerOutcome {
        let value = op(self.hart.registers.x(src), immediate);
        self.write_and_complete(dest, value)
    }

    #[inline]
    fn reg_shamt_op(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
        op: fn(u32, u32) -> u32,
    ) -> HandlerOutcome {
        let value = op(self.hart.registers.x(src), shift_amount_u5 & 0x1F);
        self.write_and_complete(dest, value)
    }

    #[inline]
    fn reg_reg_op(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: fn(u32, u32) -> u32,
    ) -> HandlerOutcome {
        let registers = &self.hart.registers;
        let value = op(registers.x(src1), registers.x(src2));
        self.write_and_complete(dest, value)
    }

    /// Multiplications and divisions complete right away, but the next instruction can only
    /// issue once the functional unit reports the result available.
    fn mul_div_op(
        &mut self,
        op: MulDivOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> HandlerOutcome {
        let unit = mul_div_unit(op);
        let declared = match unit {
            FunctionalUnit::Multiplier => self.hart.config.multiplier.latency,
            FunctionalUnit::Divider => self.hart.config.divider.latency,
        };
        let (now, pc) = (self.now, self.pc);
        let tracker = self.hart.occupancy_mut(unit);
        let latency = tracker.effective_latency(now, declared, &[src1, src2]);
        let evicted = tracker.record(OccupancyEntry {
            pc,
            latency: declared,
            start: now,
            end: now + Cycle::from(latency),
            dest,
        });
        if let Some(evicted) = evicted {
            trace!("{unit:?} evicted entry of {:#010x}", evicted.pc);
        }

        let registers = &mut self.hart.registers;
        let value = mul_div_fn(op)(registers.x(src1), registers.x(src2));
        registers.set_x(dest, value);
        Ok(HandlerResult::Completed {
            next_pc: self.fall_through(),
            latency,
        })
    }

    fn jump_op(&mut self, dest: Specifier, target: u32) -> HandlerOutcome {
        if !Alignment::WORD.is_aligned(target) {
            return exception(Exception::InstructionAddressMisaligned, target);
        }
        self.hart.registers.set_x(dest, self.pc.wrapping_add(4));
        Ok(HandlerResult::Completed {
            next_pc: self.hart.loops.resolve_from(self.pc, target),
            latency: 1,
        })
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: fn(u32, u32) -> bool,
    ) -> HandlerOutcome {
        let registers = &self.hart.registers;
        if !predicate(registers.x(src1), registers.x(src2)) {
            return self.complete();
        }
        let target = self.pc.wrapping_add_signed(offset);
        if !Alignment::WORD.is_aligned(target) {
            return exception(Exception::InstructionAddressMisaligned, target);
        }
        Ok(HandlerResult::Completed {
            next_pc: self.hart.loops.resolve_from(self.pc, target),
            latency: 1,
        })
    }

    /// Issue a data access of `size` bytes. `store` holds the value of a write.
    fn issue(&mut self, address: u32, size: u32, store: Option<u32>) -> Result<Access, MemoryError> {
        let aligned = Alignment::natural_for_size(size)
            .map_or(true, |alignment| alignment.is_aligned(address));
        if !aligned && !self.hart.config.support_misaligned_memory_access {
            return Err(MemoryError::MisalignedAccess);
        }
        let ticket = self.hart.stall.allocate_ticket();
        let mut request = MemoryRequest {
            hart: self.hart.config.hart_id,
            ticket,
            address,
            size,
            is_write: store.is_some(),
            data: store.unwrap_or(0),
        };
        match self.memory.issue_request(self.now, &mut request) {
            RequestStatus::Ok => Ok(Access::Done(request.data)),
            RequestStatus::Blocked => Ok(Access::Blocked(ticket)),
            RequestStatus::Invalid => Err(MemoryError::AccessFault),
        }
    }

    /// Loads `width` from `address` into `dest`. With `post_increment`, the given offset is added
    /// to the given base register once the load completes. If the base is also the destination,
    /// the loaded value wins.
    fn load_op(
        &mut self,
        width: LoadWidth,
        dest: Specifier,
        address: u32,
        post_increment: Option<(Specifier, i32)>,
    ) -> HandlerOutcome {
        let value = match self.context {
            ExecutionContext::Fresh => {
                self.fall_through();
                match self.issue(address, width.size(), None) {
                    Ok(Access::Done(value)) => value,
                    Ok(Access::Blocked(ticket)) => {
                        return self.suspend(ticket, PendingKind::Load { dest }, false)
                    }
                    Err(err) => return exception(load_exception(err), address),
                }
            }
            ExecutionContext::Replaying(ResumeData::Memory { data }) => data,
            // `Stall` only hands back resume data that matches the pending kind.
            ExecutionContext::Replaying(data) => unreachable!("load resumed with {data:?}"),
        };
        let registers = &mut self.hart.registers;
        if let Some((base, offset)) = post_increment {
            registers.set_x(base, registers.x(base).wrapping_add_signed(offset));
        }
        registers.set_x(dest, width.extend(value));
        self.complete()
    }

    fn store_op(&mut self, width: StoreWidth, src: Specifier, address: u32) -> HandlerOutcome {
        match self.context {
            ExecutionContext::Fresh => {
                self.fall_through();
                let value = self.hart.registers.x(src);
                match self.issue(address, width.size(), Some(value)) {
                    Ok(Access::Done(_)) => {}
                    Ok(Access::Blocked(ticket)) => {
                        return self.suspend(ticket, PendingKind::Store, false)
                    }
                    Err(err) => return exception(store_exception(err), address),
                }
            }
            ExecutionContext::Replaying(ResumeData::Memory { .. }) => {}
            // `Stall` only hands back resume data that matches the pending kind.
            ExecutionContext::Replaying(data) => unreachable!("store resumed with {data:?}"),
        }
        self.complete()
    }

    /// `p.elw`: a word load whose wait ends early if an interrupt is taken.
    ///
    /// After an interrupt the instruction is executed again from scratch once the handler
    /// returns. The successor chosen the first time is kept in the handle's scratch so that the
    /// hardware loop counters aren't decremented a second time.
    fn event_load(&mut self, dest: Specifier, address: u32) -> HandlerOutcome {
        let previous = self.scratch();
        match self.context {
            ExecutionContext::Fresh => {
                let next_pc = match previous {
                    Scratch::EventLoad {
                        interrupted: true,
                        next_pc,
                    } => next_pc,
                    _ => self.fall_through(),
                };
                self.set_scratch(Scratch::EventLoad {
                    interrupted: false,
                    next_pc,
                });
                match self.issue(address, 4, None) {
                    Ok(Access::Done(value)) => self.complete_event_load(dest, value, next_pc),
                    Ok(Access::Blocked(ticket)) => {
                        self.suspend(ticket, PendingKind::EventLoad { dest }, true)
                    }
                    Err(err) => {
                        self.set_scratch(previous);
                        exception(load_exception(err), address)
                    }
                }
            }
            ExecutionContext::Replaying(ResumeData::Memory { data }) => {
                let next_pc = match previous {
                    Scratch::EventLoad { next_pc, .. } => next_pc,
                    Scratch::Empty => self.fall_through(),
                };
                self.complete_event_load(dest, data, next_pc)
            }
            ExecutionContext::Replaying(ResumeData::Interrupted) => {
                if let Scratch::EventLoad { next_pc, .. } = previous {
                    self.set_scratch(Scratch::EventLoad {
                        interrupted: true,
                        next_pc,
                    });
                }
                Ok(HandlerResult::Interrupted)
            }
            // `Stall` only hands back resume data that matches the pending kind.
            ExecutionContext::Replaying(data) => unreachable!("event load resumed with {data:?}"),
        }
    }

    fn complete_event_load(&mut self, dest: Specifier, value: u32, next_pc: u32) -> HandlerOutcome {
        self.set_scratch(Scratch::Empty);
        self.hart.registers.set_x(dest, value);
        Ok(HandlerResult::Completed {
            next_pc,
            latency: 1,
        })
    }

    /// > The WFI instruction can also be executed when interrupts are disabled. The operation of
    /// > WFI must be unaffected by the global interrupt bits in mstatus (MIE and SIE) and the
    /// > delegation register mideleg.
    fn wfi(&mut self) -> HandlerOutcome {
        match self.context {
            ExecutionContext::Fresh if self.hart.interrupts.pending_enabled() == 0 => {
                let ticket = self.hart.stall.allocate_ticket();
                self.suspend(ticket, PendingKind::WaitForInterrupt, true)
            }
            ExecutionContext::Fresh | ExecutionContext::Replaying(ResumeData::Interrupted) => {
                self.complete()
            }
            // `Stall` only hands back resume data that matches the pending kind.
            ExecutionContext::Replaying(data) => unreachable!("wfi resumed with {data:?}"),
        }
    }

    fn csr_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        source: CsrSource,
        csr: u16,
    ) -> HandlerOutcome {
        let (operand, nonzero_source) = match source {
            CsrSource::Register(src) => (self.hart.registers.x(src), src != Specifier::X0),
            CsrSource::Immediate(value) => (value, value != 0),
        };
        let old = match self.hart.read_csr(csr) {
            Ok(value) => value,
            Err(err) => return exception(err, self.raw),
        };
        let next_pc = self.fall_through();
        // > For both CSRRS and CSRRC, if rs1=x0, then the instruction will not write to the CSR
        // > at all, and so shall not cause any of the side effects that might otherwise occur on
        // > a CSR write.
        let write = match op {
            CsrOp::ReadWrite => Some((operand, u32::MAX)),
            CsrOp::ReadSet => nonzero_source.then_some((u32::MAX, operand)),
            CsrOp::ReadClear => nonzero_source.then_some((0, operand)),
        };
        if let Some((value, mask)) = write {
            if let Err(err) = self.hart.write_csr(csr, value, mask) {
                return exception(err, self.raw);
            }
        }
        self.hart.registers.set_x(dest, old);
        Ok(HandlerResult::Completed {
            next_pc,
            latency: 1,
        })
    }

    /// Hardware loop setup. The successor is resolved against the loop registers as they were
    /// before the instruction.
    fn loop_op(&mut self, op: LoopOp) -> HandlerOutcome {
        let next_pc = self.fall_through();
        let pc = self.pc;
        let registers = &self.hart.registers;
        let loops = &mut self.hart.loops;
        match op {
            LoopOp::StartI { index, offset } => loops.slot_mut(index).start = pc.wrapping_add(offset),
            LoopOp::EndI { index, offset } => loops.slot_mut(index).end = pc.wrapping_add(offset),
            LoopOp::Count { index, src } => loops.slot_mut(index).count = registers.x(src),
            LoopOp::CountI { index, count } => loops.slot_mut(index).count = count,
            LoopOp::Setup {
                index,
                src,
                end_offset,
            } => loops.setup(
                index,
                pc.wrapping_add(4),
                pc.wrapping_add(end_offset),
                registers.x(src),
            ),
            LoopOp::SetupI {
                index,
                count,
                end_offset,
            } => loops.setup(
                index,
                pc.wrapping_add(4),
                pc.wrapping_add(end_offset),
                count,
            ),
        }
        Ok(HandlerResult::Completed {
            next_pc,
            latency: 1,
        })
    }

    /// Hand the instruction to the accelerator. Waits for the channel to be ready, then for the
    /// response, which is written to `dest`.
    fn offload(
        &mut self,
        kind: u16,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> HandlerOutcome {
        match self.context {
            ExecutionContext::Fresh | ExecutionContext::Replaying(ResumeData::Ready) => {
                let ticket = self.hart.stall.allocate_ticket();
                if !self.hart.offload.is_ready() {
                    return self.suspend(ticket, PendingKind::OffloadReady, false);
                }
                let registers = &self.hart.registers;
                self.hart.offload.send(OffloadRequest {
                    pc: self.pc,
                    encoding: self.raw,
                    kind,
                    operands: [registers.x(src1), registers.x(src2)],
                    dest,
                })?;
                self.suspend(ticket, PendingKind::OffloadResponse { dest }, false)
            }
            ExecutionContext::Replaying(ResumeData::Offload(response)) => {
                if response.error {
                    return exception(Exception::IllegalInstruction, self.raw);
                }
                self.write_and_complete(response.dest, response.value)
            }
            // `Stall` only hands back resume data that matches the pending kind.
            ExecutionContext::Replaying(data) => unreachable!("offload resumed with {data:?}"),
        }
    }
}

fn load_exception(err: MemoryError) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::LoadAddressMisaligned,
        MemoryError::AccessFault => Exception::LoadAccessFault,
    }
}

fn store_exception(err: MemoryError) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::StoreOrAmoAddressMisaligned,
        MemoryError::AccessFault => Exception::StoreOrAmoAccessFault,
    }
}

fn reg_imm_fn(op: RegImmOp) -> fn(u32, i32) -> u32 {
    match op {
        // > ADDI adds the sign-extended 12-bit immediate to register rs1. Arithmetic overflow is
        // > ignored and the result is simply the low XLEN bits of the result.
        RegImmOp::Addi => |s, imm| s.wrapping_add_signed(imm),
        RegImmOp::Slti => |s, imm| ((s as i32) < imm) as u32,
        // The immediate is sign-extended, then compared as unsigned.
        RegImmOp::Sltiu => |s, imm| (s < imm as u32) as u32,
        RegImmOp::Xori => |s, imm| s ^ imm as u32,
        RegImmOp::Ori => |s, imm| s | imm as u32,
        RegImmOp::Andi => |s, imm| s & imm as u32,
    }
}

fn reg_shamt_fn(op: RegShiftImmOp) -> fn(u32, u32) -> u32 {
    match op {
        RegShiftImmOp::Slli => |s, shamt| s << shamt,
        RegShiftImmOp::Srli => |s, shamt| s >> shamt,
        RegShiftImmOp::Srai => |s, shamt| ((s as i32) >> shamt) as u32,
    }
}

fn reg_reg_fn(op: RegRegOp) -> fn(u32, u32) -> u32 {
    match op {
        RegRegOp::Add => |s1, s2| s1.wrapping_add(s2),
        RegRegOp::Sub => |s1, s2| s1.wrapping_sub(s2),
        RegRegOp::Slt => |s1, s2| ((s1 as i32) < (s2 as i32)) as u32,
        RegRegOp::Sltu => |s1, s2| (s1 < s2) as u32,
        RegRegOp::And => |s1, s2| s1 & s2,
        RegRegOp::Or => |s1, s2| s1 | s2,
        RegRegOp::Xor => |s1, s2| s1 ^ s2,
        // > SLL, SRL, and SRA perform logical left, logical right, and arithmetic right shifts on
        // > the value in register rs1 by the shift amount held in the lower 5 bits of register rs2.
        RegRegOp::Sll => |s1, s2| s1 << (s2 & 0x1F),
        RegRegOp::Srl => |s1, s2| s1 >> (s2 & 0x1F),
        RegRegOp::Sra => |s1, s2| ((s1 as i32) >> (s2 & 0x1F)) as u32,
    }
}

fn branch_predicate(condition: BranchCondition) -> fn(u32, u32) -> bool {
    match condition {
        BranchCondition::Beq => |s1, s2| s1 == s2,
        BranchCondition::Bne => |s1, s2| s1 != s2,
        BranchCondition::Blt => |s1, s2| (s1 as i32) < (s2 as i32),
        BranchCondition::Bltu => |s1, s2| s1 < s2,
        BranchCondition::Bge => |s1, s2| (s1 as i32) >= (s2 as i32),
        BranchCondition::Bgeu => |s1, s2| s1 >= s2,
    }
}

fn mul_div_unit(op: MulDivOp) -> FunctionalUnit {
    match op {
        MulDivOp::Mul | MulDivOp::Mulh | MulDivOp::Mulhsu | MulDivOp::Mulhu => {
            FunctionalUnit::Multiplier
        }
        MulDivOp::Div | MulDivOp::Divu | MulDivOp::Rem | MulDivOp::Remu => FunctionalUnit::Divider,
    }
}

/// > The quotient of division by zero has all bits set, and the remainder of division by zero
/// > equals the dividend. Signed division overflow occurs only when the most-negative integer is
/// > divided by -1. The quotient of a signed division with overflow is equal to the dividend, and
/// > the remainder is zero.
fn mul_div_fn(op: MulDivOp) -> fn(u32, u32) -> u32 {
    match op {
        MulDivOp::Mul => |s1, s2| s1.wrapping_mul(s2),
        MulDivOp::Mulh => |s1, s2| ((s1 as i32 as i64 * s2 as i32 as i64) >> 32) as u32,
        MulDivOp::Mulhsu => |s1, s2| ((s1 as i32 as i64 * s2 as i64) >> 32) as u32,
        MulDivOp::Mulhu => |s1, s2| ((s1 as u64 * s2 as u64) >> 32) as u32,
        MulDivOp::Div => |s1, s2| match s2 {
            0 => u32::MAX,
            _ => (s1 as i32).wrapping_div(s2 as i32) as u32,
        },
        MulDivOp::Divu => |s1, s2| s1.checked_div(s2).unwrap_or(u32::MAX),
        MulDivOp::Rem => |s1, s2| match s2 {
            0 => s1,
            _ => (s1 as i32).wrapping_rem(s2 as i32) as u32,
        },
        MulDivOp::Remu => |s1, s2| s1.checked_rem(s2).unwrap_or(s1),
    }
}
