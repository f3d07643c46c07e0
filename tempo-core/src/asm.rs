//! Minimal instruction encoder used to assemble test programs.
//!
//! Operand order follows the assembly syntax, e.g. `sw(src, base, offset)` encodes
//! `sw src, offset(base)`.

use crate::registers::Specifier;

pub const NOP: u32 = 0x0000_0013;
pub const ECALL: u32 = 0x0000_0073;
pub const EBREAK: u32 = 0x0010_0073;
pub const MRET: u32 = 0x3020_0073;
pub const WFI: u32 = 0x1050_0073;
pub const FENCE_I: u32 = 0x0000_100F;

const OP_IMM: u32 = 0x13;
const OP: u32 = 0x33;
const LOAD: u32 = 0x03;
const LOAD_POST_INCREMENT: u32 = 0x0B;
const STORE: u32 = 0x23;
const BRANCH: u32 = 0x63;
const SYSTEM: u32 = 0x73;
const HWLOOP: u32 = 0x7B;
const OFFLOAD: u32 = 0x5B;

fn reg(specifier: Specifier) -> u32 {
    u32::from(specifier)
}

pub fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

pub fn i_type(immediate: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    ((immediate as u32 & 0xFFF) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

pub fn s_type(immediate: i32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = immediate as u32;
    ((imm >> 5 & 0x7F) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | ((imm & 0x1F) << 7)
        | opcode
}

pub fn b_type(offset: i32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = offset as u32;
    ((imm >> 12 & 1) << 31)
        | ((imm >> 5 & 0x3F) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | ((imm >> 1 & 0xF) << 8)
        | ((imm >> 11 & 1) << 7)
        | opcode
}

pub fn j_type(offset: i32, rd: u32, opcode: u32) -> u32 {
    let imm = offset as u32;
    ((imm >> 20 & 1) << 31)
        | ((imm >> 1 & 0x3FF) << 21)
        | ((imm >> 11 & 1) << 20)
        | ((imm >> 12 & 0xFF) << 12)
        | (rd << 7)
        | opcode
}

pub fn addi(dest: Specifier, src: Specifier, immediate: i32) -> u32 {
    i_type(immediate, reg(src), 0b000, reg(dest), OP_IMM)
}

pub fn lui(dest: Specifier, immediate: u32) -> u32 {
    (immediate & 0xFFFF_F000) | (reg(dest) << 7) | 0x37
}

pub fn add(dest: Specifier, src1: Specifier, src2: Specifier) -> u32 {
    r_type(0, reg(src2), reg(src1), 0b000, reg(dest), OP)
}

pub fn sub(dest: Specifier, src1: Specifier, src2: Specifier) -> u32 {
    r_type(0b0100000, reg(src2), reg(src1), 0b000, reg(dest), OP)
}

pub fn mul(dest: Specifier, src1: Specifier, src2: Specifier) -> u32 {
    r_type(1, reg(src2), reg(src1), 0b000, reg(dest), OP)
}

pub fn div(dest: Specifier, src1: Specifier, src2: Specifier) -> u32 {
    r_type(1, reg(src2), reg(src1), 0b100, reg(dest), OP)
}

pub fn divu(dest: Specifier, src1: Specifier, src2: Specifier) -> u32 {
    r_type(1, reg(src2), reg(src1), 0b101, reg(dest), OP)
}

pub fn rem(dest: Specifier, src1: Specifier, src2: Specifier) -> u32 {
    r_type(1, reg(src2), reg(src1), 0b110, reg(dest), OP)
}

pub fn lw(dest: Specifier, base: Specifier, offset: i32) -> u32 {
    i_type(offset, reg(base), 0b010, reg(dest), LOAD)
}

pub fn lbu(dest: Specifier, base: Specifier, offset: i32) -> u32 {
    i_type(offset, reg(base), 0b100, reg(dest), LOAD)
}

pub fn sw(src: Specifier, base: Specifier, offset: i32) -> u32 {
    s_type(offset, reg(src), reg(base), 0b010, STORE)
}

pub fn sb(src: Specifier, base: Specifier, offset: i32) -> u32 {
    s_type(offset, reg(src), reg(base), 0b000, STORE)
}

pub fn beq(src1: Specifier, src2: Specifier, offset: i32) -> u32 {
    b_type(offset, reg(src2), reg(src1), 0b000, BRANCH)
}

pub fn bne(src1: Specifier, src2: Specifier, offset: i32) -> u32 {
    b_type(offset, reg(src2), reg(src1), 0b001, BRANCH)
}

pub fn jal(dest: Specifier, offset: i32) -> u32 {
    j_type(offset, reg(dest), 0x6F)
}

pub fn csrrw(dest: Specifier, csr: u16, src: Specifier) -> u32 {
    i_type(csr as i32, reg(src), 0b001, reg(dest), SYSTEM)
}

pub fn csrrs(dest: Specifier, csr: u16, src: Specifier) -> u32 {
    i_type(csr as i32, reg(src), 0b010, reg(dest), SYSTEM)
}

pub fn csrrsi(dest: Specifier, csr: u16, uimm5: u32) -> u32 {
    i_type(csr as i32, uimm5 & 0x1F, 0b110, reg(dest), SYSTEM)
}

pub fn csrrci(dest: Specifier, csr: u16, uimm5: u32) -> u32 {
    i_type(csr as i32, uimm5 & 0x1F, 0b111, reg(dest), SYSTEM)
}

/// `csrr dest, csr`
pub fn csrr(dest: Specifier, csr: u16) -> u32 {
    csrrs(dest, csr, Specifier::X0)
}

/// `p.lw dest, offset(base!)`
pub fn p_lw(dest: Specifier, base: Specifier, offset: i32) -> u32 {
    i_type(offset, reg(base), 0b010, reg(dest), LOAD_POST_INCREMENT)
}

/// `p.lbu dest, offset(base!)`
pub fn p_lbu(dest: Specifier, base: Specifier, offset: i32) -> u32 {
    i_type(offset, reg(base), 0b100, reg(dest), LOAD_POST_INCREMENT)
}

/// `p.elw dest, offset(base)`
pub fn p_elw(dest: Specifier, base: Specifier, offset: i32) -> u32 {
    i_type(offset, reg(base), 0b110, reg(dest), LOAD)
}

pub fn lp_starti(index: u32, offset: u32) -> u32 {
    i_type((offset >> 1) as i32, 0, 0b000, index, HWLOOP)
}

pub fn lp_endi(index: u32, offset: u32) -> u32 {
    i_type((offset >> 1) as i32, 0, 0b001, index, HWLOOP)
}

pub fn lp_count(index: u32, src: Specifier) -> u32 {
    i_type(0, reg(src), 0b010, index, HWLOOP)
}

pub fn lp_counti(index: u32, count: u32) -> u32 {
    i_type(count as i32, 0, 0b011, index, HWLOOP)
}

pub fn lp_setup(index: u32, src: Specifier, end_offset: u32) -> u32 {
    i_type((end_offset >> 1) as i32, reg(src), 0b100, index, HWLOOP)
}

pub fn lp_setupi(index: u32, count: u32, end_offset: u32) -> u32 {
    i_type(count as i32, (end_offset >> 1) & 0x1F, 0b101, index, HWLOOP)
}

pub fn offload(kind: u16, dest: Specifier, src1: Specifier, src2: Specifier) -> u32 {
    let kind = kind as u32;
    r_type(kind >> 3, reg(src2), reg(src1), kind & 0b111, reg(dest), OFFLOAD)
}

/// Serializes a sequence of instructions into little-endian program bytes.
pub fn program(instructions: &[u32]) -> Vec<u8> {
    instructions
        .iter()
        .flat_map(|instruction| instruction.to_le_bytes())
        .collect()
}
