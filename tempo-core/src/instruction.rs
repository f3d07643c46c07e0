use crate::registers::Specifier;
use thiserror::Error;

/// Data structure that can hold any supported instruction in its decoded form.
///
/// Besides RV32I this covers RV32M, the `Zicsr`/`Zifencei` subset needed for trap handling, and
/// three non-standard groups handled by the timing subsystems of a hart: post-increment and event
/// loads, zero-overhead hardware loops, and accelerator offload.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    OpImm {
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
    },
    OpShiftImm {
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    },
    Auipc {
        dest: Specifier,
        immediate: i32,
    },
    Lui {
        dest: Specifier,
        immediate: i32,
    },
    Op {
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    MulDiv {
        op: MulDivOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Jal {
        dest: Specifier,
        offset: i32,
    },
    Jalr {
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Branch {
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
    },
    Load {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    /// Load from `base`, then add `offset` to `base` (`p.lw rd, imm(rs1!)`).
    LoadPostIncrement {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    /// Word load from an event-unit address that may block until an event arrives
    /// (`p.elw rd, imm(rs1)`). The wait can be interrupted.
    EventLoad {
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Store {
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    },
    Fence {
        predecessor: FenceOrderCombination,
        successor: FenceOrderCombination,
    },
    FenceI,
    Csr {
        op: CsrOp,
        dest: Specifier,
        source: CsrSource,
        csr: u16,
    },
    Ecall,
    Ebreak,
    Mret,
    Wfi,
    HwLoop(LoopOp),
    Offload {
        kind: u16,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp {
    Slli,
    Srli,
    Srai,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
    Add,
    Slt,
    Sltu,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sub,
    Sra,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MulDivOp {
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition {
    Beq,
    Bne,
    Blt,
    Bltu,
    Bge,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadWidth {
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
}

impl LoadWidth {
    /// Number of bytes accessed.
    pub fn size(self) -> u32 {
        match self {
            LoadWidth::Lb | LoadWidth::Lbu => 1,
            LoadWidth::Lh | LoadWidth::Lhu => 2,
            LoadWidth::Lw => 4,
        }
    }

    /// Extends the `size()` low bytes of `raw` to a full register value.
    pub fn extend(self, raw: u32) -> u32 {
        match self {
            LoadWidth::Lb => raw as u8 as i8 as i32 as u32,
            LoadWidth::Lbu => raw as u8 as u32,
            LoadWidth::Lh => raw as u16 as i16 as i32 as u32,
            LoadWidth::Lhu => raw as u16 as u32,
            LoadWidth::Lw => raw,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreWidth {
    Sb,
    Sh,
    Sw,
}

impl StoreWidth {
    /// Number of bytes accessed.
    pub fn size(self) -> u32 {
        match self {
            StoreWidth::Sb => 1,
            StoreWidth::Sh => 2,
            StoreWidth::Sw => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FenceOrderCombination {
    pub device_input: bool,
    pub device_output: bool,
    pub memory_reads: bool,
    pub memory_writes: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrOp {
    ReadWrite,
    ReadSet,
    ReadClear,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrSource {
    Register(Specifier),
    /// 5-bit zero-extended immediate.
    Immediate(u32),
}

/// Hardware loop setup instructions. `index` selects one of the two loop slots.
///
/// Offsets are byte offsets relative to the address of the setup instruction itself (the encoded
/// immediate is in halfwords). An end address designates the *last* instruction of the body.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoopOp {
    /// `lp.starti L, uimm`
    StartI { index: usize, offset: u32 },
    /// `lp.endi L, uimm`
    EndI { index: usize, offset: u32 },
    /// `lp.count L, rs1`
    Count { index: usize, src: Specifier },
    /// `lp.counti L, uimm`
    CountI { index: usize, count: u32 },
    /// `lp.setup L, rs1, uimm`
    Setup {
        index: usize,
        src: Specifier,
        end_offset: u32,
    },
    /// `lp.setupi L, uimmS, uimmL`
    SetupI {
        index: usize,
        count: u32,
        end_offset: u32,
    },
}

impl Instruction {
    pub fn decode(raw_instruction: u32) -> Result<Self, DecodeError> {
        match opcode(raw_instruction).ok_or(DecodeError::UnsupportedOpcode(raw_instruction))? {
            Opcode::OpImm => match i_funct(raw_instruction) {
                Some(op) => Ok(Self::OpImm {
                    op,
                    dest: rd(raw_instruction),
                    src: rs1(raw_instruction),
                    immediate: i_imm(raw_instruction),
                }),
                None => match i_shfunct(raw_instruction) {
                    Some(op) => Ok(Self::OpShiftImm {
                        op,
                        dest: rd(raw_instruction),
                        src: rs1(raw_instruction),
                        shift_amount_u5: shamt(raw_instruction),
                    }),
                    None => Err(DecodeError::IllegalInstruction(raw_instruction)),
                },
            },
            Opcode::Auipc => Ok(Self::Auipc {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Lui => Ok(Self::Lui {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Op => {
                if funct7(raw_instruction) == 0b0000001 {
                    return Ok(Self::MulDiv {
                        op: m_funct(raw_instruction),
                        dest: rd(raw_instruction),
                        src1: rs1(raw_instruction),
                        src2: rs2(raw_instruction),
                    });
                }
                match r_funct(raw_instruction) {
                    Some(op) => Ok(Self::Op {
                        op,
                        dest: rd(raw_instruction),
                        src1: rs1(raw_instruction),
                        src2: rs2(raw_instruction),
                    }),
                    None => Err(DecodeError::IllegalInstruction(raw_instruction)),
                }
            }
            Opcode::Jal => Ok(Self::Jal {
                dest: rd(raw_instruction),
                offset: j_imm(raw_instruction),
            }),
            Opcode::Jalr => Ok(Self::Jalr {
                dest: rd(raw_instruction),
                base: rs1(raw_instruction),
                offset: i_imm(raw_instruction),
            }),
            Opcode::Branch => match b_funct(raw_instruction) {
                Some(condition) => Ok(Self::Branch {
                    condition,
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                    offset: b_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction(raw_instruction)),
            },
            Opcode::Load => {
                if funct3(raw_instruction) == 0b110 {
                    return Ok(Self::EventLoad {
                        dest: rd(raw_instruction),
                        base: rs1(raw_instruction),
                        offset: i_imm(raw_instruction),
                    });
                }
                match i_width(raw_instruction) {
                    Some(width) => Ok(Self::Load {
                        width,
                        dest: rd(raw_instruction),
                        base: rs1(raw_instruction),
                        offset: i_imm(raw_instruction),
                    }),
                    None => Err(DecodeError::IllegalInstruction(raw_instruction)),
                }
            }
            Opcode::LoadPostIncrement => match i_width(raw_instruction) {
                Some(width) => Ok(Self::LoadPostIncrement {
                    width,
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction(raw_instruction)),
            },
            Opcode::Store => match s_width(raw_instruction) {
                Some(width) => Ok(Self::Store {
                    width,
                    src: rs2(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: s_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction(raw_instruction)),
            },
            Opcode::MiscMem => match funct3(raw_instruction) {
                // Reserved fields of FENCE (fm, rd, rs1) are ignored, which makes every such
                // encoding behave as a plain fence.
                0b000 => Ok(Self::Fence {
                    predecessor: fence_set(raw_instruction >> 24),
                    successor: fence_set(raw_instruction >> 20),
                }),
                0b001 => Ok(Self::FenceI),
                _ => Err(DecodeError::IllegalInstruction(raw_instruction)),
            },
            Opcode::System => decode_system(raw_instruction),
            Opcode::HwLoop => decode_hwloop(raw_instruction).map(Self::HwLoop),
            Opcode::Offload => Ok(Self::Offload {
                kind: ((funct7(raw_instruction) as u16) << 3) | funct3(raw_instruction) as u16,
                dest: rd(raw_instruction),
                src1: rs1(raw_instruction),
                src2: rs2(raw_instruction),
            }),
        }
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("instruction {0:#010x} has unsupported opcode")]
    UnsupportedOpcode(u32),
    #[error("illegal instruction {0:#010x}")]
    IllegalInstruction(u32),
}

fn decode_system(raw_instruction: u32) -> Result<Instruction, DecodeError> {
    let csr = (raw_instruction >> 20) as u16;
    let dest = rd(raw_instruction);
    let (op, source) = match funct3(raw_instruction) {
        0b000 => {
            if u8::from(dest) != 0 || u8::from(rs1(raw_instruction)) != 0 {
                return Err(DecodeError::IllegalInstruction(raw_instruction));
            }
            return match csr {
                0x000 => Ok(Instruction::Ecall),
                0x001 => Ok(Instruction::Ebreak),
                0x302 => Ok(Instruction::Mret),
                0x105 => Ok(Instruction::Wfi),
                _ => Err(DecodeError::IllegalInstruction(raw_instruction)),
            };
        }
        0b001 => (CsrOp::ReadWrite, CsrSource::Register(rs1(raw_instruction))),
        0b010 => (CsrOp::ReadSet, CsrSource::Register(rs1(raw_instruction))),
        0b011 => (CsrOp::ReadClear, CsrSource::Register(rs1(raw_instruction))),
        0b101 => (CsrOp::ReadWrite, CsrSource::Immediate(uimm5(raw_instruction))),
        0b110 => (CsrOp::ReadSet, CsrSource::Immediate(uimm5(raw_instruction))),
        0b111 => (CsrOp::ReadClear, CsrSource::Immediate(uimm5(raw_instruction))),
        _ => return Err(DecodeError::IllegalInstruction(raw_instruction)),
    };
    Ok(Instruction::Csr {
        op,
        dest,
        source,
        csr: csr & 0xFFF,
    })
}

fn decode_hwloop(raw_instruction: u32) -> Result<LoopOp, DecodeError> {
    let rd = u8::from(rd(raw_instruction));
    if rd > 1 {
        return Err(DecodeError::IllegalInstruction(raw_instruction));
    }
    let index = rd as usize;
    let uimm = raw_instruction >> 20;
    match funct3(raw_instruction) {
        0b000 => Ok(LoopOp::StartI {
            index,
            offset: uimm << 1,
        }),
        0b001 => Ok(LoopOp::EndI {
            index,
            offset: uimm << 1,
        }),
        0b010 => Ok(LoopOp::Count {
            index,
            src: rs1(raw_instruction),
        }),
        0b011 => Ok(LoopOp::CountI { index, count: uimm }),
        0b100 => Ok(LoopOp::Setup {
            index,
            src: rs1(raw_instruction),
            end_offset: uimm << 1,
        }),
        0b101 => Ok(LoopOp::SetupI {
            index,
            count: uimm,
            end_offset: uimm5(raw_instruction) << 1,
        }),
        _ => Err(DecodeError::IllegalInstruction(raw_instruction)),
    }
}

/// Returns the 7-bit *opcode* value of the instruction, or `None` if it isn't supported.
fn opcode(raw_instruction: u32) -> Option<Opcode> {
    #[allow(clippy::unusual_byte_groupings)]
    match raw_instruction & 0x7F {
        0b00_000_11 => Some(Opcode::Load),
        // custom-0
        0b00_010_11 => Some(Opcode::LoadPostIncrement),
        0b00_011_11 => Some(Opcode::MiscMem),
        0b00_100_11 => Some(Opcode::OpImm),
        0b00_101_11 => Some(Opcode::Auipc),
        0b01_000_11 => Some(Opcode::Store),
        0b01_100_11 => Some(Opcode::Op),
        0b01_101_11 => Some(Opcode::Lui),
        // custom-2
        0b10_110_11 => Some(Opcode::Offload),
        0b11_000_11 => Some(Opcode::Branch),
        0b11_001_11 => Some(Opcode::Jalr),
        0b11_011_11 => Some(Opcode::Jal),
        0b11_100_11 => Some(Opcode::System),
        // custom-3
        0b11_110_11 => Some(Opcode::HwLoop),
        _ => None,
    }
}

/// Returns the 5-bit *rd* value for R-type, I-type, U-type, J-type instructions.
fn rd(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 7) & 0x1F) as u8)
}

/// Returns the 5-bit *rs1* value for R-type, I-type, S-type, B-type instructions.
fn rs1(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 15) & 0x1F) as u8)
}

/// Returns the 5-bit *rs2* value for R-type, S-type, B-type instructions.
fn rs2(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 20) & 0x1F) as u8)
}

/// Returns the unsigned 5-bit immediate stored in the *rs1* field.
fn uimm5(raw_instruction: u32) -> u32 {
    (raw_instruction >> 15) & 0x1F
}

fn fence_set(bits: u32) -> FenceOrderCombination {
    FenceOrderCombination {
        device_input: bits & 0b1000 != 0,
        device_output: bits & 0b0100 != 0,
        memory_reads: bits & 0b0010 != 0,
        memory_writes: bits & 0b0001 != 0,
    }
}

fn i_funct(raw_instruction: u32) -> Option<RegImmOp> {
    match funct3(raw_instruction) {
        0b000 => Some(RegImmOp::Addi),
        0b010 => Some(RegImmOp::Slti),
        0b011 => Some(RegImmOp::Sltiu),
        0b100 => Some(RegImmOp::Xori),
        0b110 => Some(RegImmOp::Ori),
        0b111 => Some(RegImmOp::Andi),
        _ => None,
    }
}

fn i_shfunct(raw_instruction: u32) -> Option<RegShiftImmOp> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b0000000, 0b001) => Some(RegShiftImmOp::Slli),
        (0b0000000, 0b101) => Some(RegShiftImmOp::Srli),
        (0b0100000, 0b101) => Some(RegShiftImmOp::Srai),
        _ => None,
    }
}

fn i_width(raw_instruction: u32) -> Option<LoadWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(LoadWidth::Lb),
        0b001 => Some(LoadWidth::Lh),
        0b010 => Some(LoadWidth::Lw),
        0b100 => Some(LoadWidth::Lbu),
        0b101 => Some(LoadWidth::Lhu),
        _ => None,
    }
}

fn s_width(raw_instruction: u32) -> Option<StoreWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(StoreWidth::Sb),
        0b001 => Some(StoreWidth::Sh),
        0b010 => Some(StoreWidth::Sw),
        _ => None,
    }
}

fn r_funct(raw_instruction: u32) -> Option<RegRegOp> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b0000000, 0b000) => Some(RegRegOp::Add),
        (0b0000000, 0b001) => Some(RegRegOp::Sll),
        (0b0000000, 0b010) => Some(RegRegOp::Slt),
        (0b0000000, 0b011) => Some(RegRegOp::Sltu),
        (0b0000000, 0b100) => Some(RegRegOp::Xor),
        (0b0000000, 0b101) => Some(RegRegOp::Srl),
        (0b0000000, 0b110) => Some(RegRegOp::Or),
        (0b0000000, 0b111) => Some(RegRegOp::And),
        (0b0100000, 0b000) => Some(RegRegOp::Sub),
        (0b0100000, 0b101) => Some(RegRegOp::Sra),
        _ => None,
    }
}

fn m_funct(raw_instruction: u32) -> MulDivOp {
    match funct3(raw_instruction) {
        0b000 => MulDivOp::Mul,
        0b001 => MulDivOp::Mulh,
        0b010 => MulDivOp::Mulhsu,
        0b011 => MulDivOp::Mulhu,
        0b100 => MulDivOp::Div,
        0b101 => MulDivOp::Divu,
        0b110 => MulDivOp::Rem,
        _ => MulDivOp::Remu,
    }
}

fn b_funct(raw_instruction: u32) -> Option<BranchCondition> {
    match funct3(raw_instruction) {
        0b000 => Some(BranchCondition::Beq),
        0b001 => Some(BranchCondition::Bne),
        0b100 => Some(BranchCondition::Blt),
        0b101 => Some(BranchCondition::Bge),
        0b110 => Some(BranchCondition::Bltu),
        0b111 => Some(BranchCondition::Bgeu),
        _ => None,
    }
}

/// Returns the 3-bit *funct3* value for R-type, I-type, S-type, B-type instructions.
fn funct3(raw_instruction: u32) -> u8 {
    ((raw_instruction >> 12) & 0b111) as u8
}

/// Returns the 7-bit *funct7* value for R-type instructions.
fn funct7(raw_instruction: u32) -> u8 {
    (raw_instruction >> 25) as u8
}

/// Returns the 5-bit *shamt* value for S-type shift instructions.
fn shamt(raw_instruction: u32) -> u32 {
    (raw_instruction >> 20) & 0x1F
}

/// Returns the 12-bit I-immediate sign-extended to 32 bits.
fn i_imm(raw_instruction: u32) -> i32 {
    raw_instruction as i32 >> 20
}

/// Returns the 12-bit S-immediate sign-extended to 32 bits.
fn s_imm(raw_instruction: u32) -> i32 {
    let imm_11_5 = raw_instruction & 0xFE00_0000;
    let imm_4_0 = raw_instruction & 0x0000_0F80;
    (imm_11_5 | (imm_4_0 << 13)) as i32 >> 20
}

/// Returns the 13-bit B-immediate sign-extended to 32 bits.
fn b_imm(raw_instruction: u32) -> i32 {
    let imm_12 = raw_instruction & 0x8000_0000;
    let imm_10_5 = raw_instruction & 0x7E00_0000;
    let imm_4_1 = raw_instruction & 0x0000_0F00;
    let imm_11 = raw_instruction & 0x0000_0080;
    (imm_12 | (imm_11 << 23) | (imm_10_5 >> 1) | (imm_4_1 << 12)) as i32 >> 19
}

/// Returns the signed 32-bit U-immediate.
fn u_imm(raw_instruction: u32) -> i32 {
    (raw_instruction & 0xFFFF_F000) as i32
}

/// Returns the 21-bit J-immediate sign-extended to 32 bits.
fn j_imm(raw_instruction: u32) -> i32 {
    let imm_20 = raw_instruction & 0x8000_0000;
    let imm_10_1 = raw_instruction & 0x7FE0_0000;
    let imm_11 = raw_instruction & 0x0010_0000;
    let imm_19_12 = raw_instruction & 0x000F_F000;
    (imm_20 | (imm_19_12 << 11) | (imm_11 << 2) | (imm_10_1 >> 9)) as i32 >> 11
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Opcode {
    OpImm,
    Auipc,
    Lui,
    Op,
    Jal,
    Jalr,
    Branch,
    Load,
    LoadPostIncrement,
    Store,
    MiscMem,
    System,
    HwLoop,
    Offload,
}
