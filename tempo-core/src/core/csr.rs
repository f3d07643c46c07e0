//! Control and status registers implemented by a hart.

use super::{Exception, Hart};

pub type CsrSpecifier = u16;

/// Cycle counter for RDCYCLE instruction.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Instructions-retired counter for RDINSTRET instruction.
pub const INSTRET: CsrSpecifier = 0xC02;
/// Upper 32 bits of `cycle`, RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of `instret`, RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;

/// Vendor ID.
pub const MVENDORID: CsrSpecifier = 0xF11;
/// Architecture ID.
pub const MARCHID: CsrSpecifier = 0xF12;
/// Implementation ID.
pub const MIMPID: CsrSpecifier = 0xF13;
/// Hardware thread ID.
pub const MHARTID: CsrSpecifier = 0xF14;

/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// ISA and extensions.
pub const MISA: CsrSpecifier = 0x301;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine trap-handler base address.
pub const MTVEC: CsrSpecifier = 0x305;
/// Scratch register for machine trap handlers.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;

/// Machine cycle counter.
pub const MCYCLE: CsrSpecifier = 0xB00;
/// Machine instructions-retired counter.
pub const MINSTRET: CsrSpecifier = 0xB02;
/// Upper 32 bits of `mcycle`, RV32 only.
pub const MCYCLEH: CsrSpecifier = 0xB80;
/// Upper 32 bits of `minstret`, RV32 only.
pub const MINSTRETH: CsrSpecifier = 0xB82;

/// Hardware loop 0 start address.
pub const LPSTART0: CsrSpecifier = 0x7C0;
/// Hardware loop 0 end address.
pub const LPEND0: CsrSpecifier = 0x7C1;
/// Hardware loop 0 iteration count.
pub const LPCOUNT0: CsrSpecifier = 0x7C2;
/// Hardware loop 1 start address.
pub const LPSTART1: CsrSpecifier = 0x7C4;
/// Hardware loop 1 end address.
pub const LPEND1: CsrSpecifier = 0x7C5;
/// Hardware loop 1 iteration count.
pub const LPCOUNT1: CsrSpecifier = 0x7C6;

/// RV32 with the I and M base extensions, plus non-standard extensions (X).
const MISA_VALUE: u32 = (1 << 30) | (1 << (b'I' - b'A')) | (1 << (b'M' - b'A')) | (1 << (b'X' - b'A'));

/// > The top two bits (csr[11:10]) indicate whether the register is read/write (00, 01, or 10) or
/// > read-only (11).
fn is_read_only(csr: CsrSpecifier) -> bool {
    csr >> 10 & 0b11 == 0b11
}

/// Maps a hardware loop CSR to `(loop index, field)`, with field 0 = start, 1 = end, 2 = count.
fn loop_field(csr: CsrSpecifier) -> Option<(usize, u16)> {
    match csr {
        LPSTART0..=LPCOUNT0 => Some((0, csr - LPSTART0)),
        LPSTART1..=LPCOUNT1 => Some((1, csr - LPSTART1)),
        _ => None,
    }
}

impl Hart {
    /// Read a CSR. Unknown CSRs raise an illegal instruction exception.
    pub fn read_csr(&self, csr: CsrSpecifier) -> Result<u32, Exception> {
        if let Some((index, field)) = loop_field(csr) {
            let slot = self.loops.slot(index);
            return Ok(match field {
                0 => slot.start,
                1 => slot.end,
                _ => slot.count,
            });
        }
        Ok(match csr {
            CYCLE | MCYCLE => self.counters.cycles() as u32,
            CYCLEH | MCYCLEH => (self.counters.cycles() >> 32) as u32,
            INSTRET | MINSTRET => self.counters.instret() as u32,
            INSTRETH | MINSTRETH => (self.counters.instret() >> 32) as u32,
            MVENDORID | MARCHID | MIMPID => 0,
            MHARTID => self.config.hart_id as u32,
            MSTATUS => self.trap.read_mstatus(),
            MISA => MISA_VALUE,
            MIE => self.interrupts.read_mie(),
            MIP => self.interrupts.read_mip(),
            MTVEC => self.trap.read_mtvec(),
            MSCRATCH => self.trap.read_mscratch(),
            MEPC => self.trap.read_mepc(),
            MCAUSE => self.trap.read_mcause(),
            MTVAL => self.trap.read_mtval(),
            _ => return Err(Exception::IllegalInstruction),
        })
    }

    /// Write the bits of `value` selected by `mask` to a CSR.
    pub(super) fn write_csr(
        &mut self,
        csr: CsrSpecifier,
        value: u32,
        mask: u32,
    ) -> Result<(), Exception> {
        if is_read_only(csr) {
            return Err(Exception::IllegalInstruction);
        }
        if let Some((index, field)) = loop_field(csr) {
            let slot = self.loops.slot_mut(index);
            let register = match field {
                0 => &mut slot.start,
                1 => &mut slot.end,
                _ => &mut slot.count,
            };
            *register = *register & !mask | value & mask;
            return Ok(());
        }
        match csr {
            MCYCLE => self.counters.write_mcycle(value, mask),
            MCYCLEH => self.counters.write_mcycleh(value, mask),
            MINSTRET => self.counters.write_minstret(value, mask),
            MINSTRETH => self.counters.write_minstreth(value, mask),
            MSTATUS => self.trap.write_mstatus(value, mask),
            // WARL, no writable fields
            MISA => {}
            MIE => self.interrupts.write_mie(value, mask),
            // Every pending bit is driven by an interrupt line.
            MIP => {}
            MTVEC => self.trap.write_mtvec(value, mask),
            MSCRATCH => self.trap.write_mscratch(value, mask),
            MEPC => self.trap.write_mepc(value, mask),
            MCAUSE => self.trap.write_mcause(value, mask),
            MTVAL => self.trap.write_mtval(value, mask),
            _ => return Err(Exception::IllegalInstruction),
        }
        Ok(())
    }
}
