use super::{Exception, Interrupt};
use log::debug;

const MSTATUS_MIE: u32 = 1 << 3;
const MSTATUS_MPIE: u32 = 1 << 7;
/// MPP is hardwired to M-mode, the only privilege level.
const MSTATUS_MPP: u32 = 0b11 << 11;

/// The value of an `mcause` register.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Cause(u32);

impl Cause {
    const INTERRUPT_BIT: u32 = 1 << 31;

    pub fn exception(exception: Exception) -> Self {
        Self(exception.code())
    }

    pub fn interrupt(interrupt: Interrupt) -> Self {
        Self(Self::INTERRUPT_BIT | interrupt.code())
    }

    pub fn is_interrupt(self) -> bool {
        self.0 & Self::INTERRUPT_BIT != 0
    }

    pub fn code(self) -> u32 {
        self.0 & !Self::INTERRUPT_BIT
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }
}

/// Machine-mode trap state: `mstatus` interrupt-enable bits, `mtvec`, `mscratch`, `mepc`,
/// `mcause`, `mtval`.
#[derive(Debug, Clone)]
pub struct Trap {
    mie: bool,
    mpie: bool,
    mtvec: u32,
    mscratch: u32,
    mepc: u32,
    mcause: Cause,
    mtval: u32,
    taken: u64,
}

impl Trap {
    pub fn new(mtvec: u32) -> Self {
        Self {
            mie: false,
            mpie: false,
            mtvec: mtvec & !0b10,
            mscratch: 0,
            mepc: 0,
            mcause: Cause::default(),
            mtval: 0,
            taken: 0,
        }
    }

    /// Returns `true` if interrupts are globally enabled (`mstatus.MIE`).
    pub fn interrupts_enabled(&self) -> bool {
        self.mie
    }

    /// Number of traps taken.
    pub fn taken(&self) -> u64 {
        self.taken
    }

    /// Enter the trap handler for a trap at `pc`. Returns the handler address.
    ///
    /// In vectored mode (`mtvec[1:0] == 1`), interrupts jump to `BASE + 4 * cause`.
    pub fn enter(&mut self, pc: u32, cause: Cause, tval: u32) -> u32 {
        self.mepc = pc;
        self.mcause = cause;
        self.mtval = tval;
        self.mpie = self.mie;
        self.mie = false;
        self.taken += 1;
        let base = self.mtvec & !0b11;
        let target = if cause.is_interrupt() && self.mtvec & 0b11 == 1 {
            base.wrapping_add(4 * cause.code())
        } else {
            base
        };
        debug!(
            "Trap {:#010x} at {pc:#010x} (tval {tval:#010x}), handler at {target:#010x}",
            cause.to_u32()
        );
        target
    }

    /// Return from the trap handler (`mret`). Returns the address to continue at.
    pub fn leave(&mut self) -> u32 {
        self.mie = self.mpie;
        self.mpie = true;
        self.mepc
    }

    pub fn read_mstatus(&self) -> u32 {
        let mut value = MSTATUS_MPP;
        if self.mie {
            value |= MSTATUS_MIE;
        }
        if self.mpie {
            value |= MSTATUS_MPIE;
        }
        value
    }

    /// Only MIE and MPIE are writable.
    pub fn write_mstatus(&mut self, value: u32, mask: u32) {
        let value = self.read_mstatus() & !mask | value & mask;
        self.mie = value & MSTATUS_MIE != 0;
        self.mpie = value & MSTATUS_MPIE != 0;
    }

    pub fn read_mtvec(&self) -> u32 {
        self.mtvec
    }

    /// Modes other than direct (0) and vectored (1) are reserved; mode bit 1 is hardwired to 0.
    pub fn write_mtvec(&mut self, value: u32, mask: u32) {
        self.mtvec = (self.mtvec & !mask | value & mask) & !0b10;
    }

    pub fn read_mscratch(&self) -> u32 {
        self.mscratch
    }

    pub fn write_mscratch(&mut self, value: u32, mask: u32) {
        self.mscratch = self.mscratch & !mask | value & mask;
    }

    pub fn read_mepc(&self) -> u32 {
        self.mepc
    }

    pub fn write_mepc(&mut self, value: u32, mask: u32) {
        self.mepc = (self.mepc & !mask | value & mask) & !0b11;
    }

    pub fn read_mcause(&self) -> u32 {
        self.mcause.to_u32()
    }

    pub fn mcause(&self) -> Cause {
        self.mcause
    }

    pub fn write_mcause(&mut self, value: u32, mask: u32) {
        self.mcause = Cause(self.mcause.0 & !mask | value & mask);
    }

    pub fn read_mtval(&self) -> u32 {
        self.mtval
    }

    pub fn write_mtval(&mut self, value: u32, mask: u32) {
        self.mtval = self.mtval & !mask | value & mask;
    }
}
