//! General purpose registers of a single hart.

use core::fmt;
use std::fmt::Formatter;

/// The type of a single `x` register.
pub type X = u32;

/// The bit width of the `x` registers.
pub const XLEN: u32 = X::BITS;

/// The number of `x` registers available (indices start at `0` for `x0`)
pub const LEN: u8 = 32;

/// ABI mnemonics of the `x` registers, indexed by register number.
const ABI_NAMES: [&str; LEN as usize] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// A hart's general purpose registers.
///
/// There are 32 `x` word-size (32 bit) registers, named `x0` up to `x31`.
/// The register `x0` (aka `zero`) is always zero. Writes to it are ignored.
/// There is also the `pc` register which holds the address of the instruction being dispatched.
///
/// Two register files compare equal if every `x` register and the `pc` match, which is what the
/// replay tests rely on to compare a stalled execution with an uninterrupted one.
///
/// It is not possible to get a mutable reference to an `x` register, since that would allow
/// unchecked writes to register `x0`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Registers {
    x_registers: [X; LEN as usize],
    pc: u32,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Registers {
    /// Returns a fresh set of all-zero registers, with `pc` set to `initial_pc`.
    pub fn new(initial_pc: u32) -> Self {
        Self {
            x_registers: [0; LEN as usize],
            pc: initial_pc,
        }
    }

    /// Returns the value of an `x` register.
    pub fn x(&self, specifier: Specifier) -> X {
        self.x_registers[usize::from(specifier)]
    }

    /// Sets the value of an `x` register.
    ///
    /// Writes to register `x0` are ignored.
    pub fn set_x(&mut self, specifier: Specifier, value: X) {
        self.replace_x(specifier, value);
    }

    /// Replaces the value of an `x` register, returning its old value.
    ///
    /// Writes to register `x0` are ignored.
    pub fn replace_x(&mut self, specifier: Specifier, value: X) -> X {
        if specifier.0 == 0 {
            0 // Ignore writes to register `x0`
        } else {
            std::mem::replace(&mut self.x_registers[specifier.0 as usize], value)
        }
    }

    /// Returns the value of the `pc` register.
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Sets the `pc` register.
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    /// Iterate over `(specifier, value)` pairs for all `x` registers.
    pub fn iter(&self) -> impl Iterator<Item = (Specifier, X)> + '_ {
        Specifier::iter_all().map(|s| (s, self.x(s)))
    }
}

/// An `x` register specifier. Can take values in the range `0..LEN`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Specifier(u8);

impl Specifier {
    /// Register `x0`, a.k.a. register `zero`, always returns `0` on read, and ignores any writes.
    pub const X0: Self = Specifier(0);
    pub const RA: Self = Specifier(1);
    pub const SP: Self = Specifier(2);
    pub const T0: Self = Specifier(5);
    pub const T1: Self = Specifier(6);
    pub const T2: Self = Specifier(7);
    pub const A0: Self = Specifier(10);
    pub const A1: Self = Specifier(11);
    pub const A2: Self = Specifier(12);
    pub const A3: Self = Specifier(13);
    pub const A4: Self = Specifier(14);
    pub const A5: Self = Specifier(15);

    /// Create a register specifier from its index, returning `None` if `index > 31`.
    pub fn new<U: TryInto<u8>>(index: U) -> Option<Self> {
        let index = index.try_into().ok()?;
        (index < LEN).then_some(Self(index))
    }

    /// Convert a 5-bit value into a register specifier.
    /// Panics if the value doesn't fit in 5 bits (`0..=31`).
    pub fn from_u5(value_u5: u8) -> Self {
        const_assert_eq!(LEN, 32);
        if value_u5 > 31 {
            panic!("out of range u5 used");
        }
        Self(value_u5)
    }

    /// Return an iterator over all register specifier, starting at x0 up to x31.
    pub fn iter_all() -> impl Iterator<Item = Self> {
        (0..LEN).map(Self)
    }

    /// Returns the ABI mnemonic of this register, e.g. `a0` for `x10`.
    pub fn abi_name(self) -> &'static str {
        ABI_NAMES[self.0 as usize]
    }
}

impl From<Specifier> for u8 {
    fn from(value: Specifier) -> Self {
        value.0
    }
}

impl From<Specifier> for u32 {
    fn from(value: Specifier) -> Self {
        value.0 as u32
    }
}

impl From<Specifier> for usize {
    fn from(value: Specifier) -> Self {
        value.0 as usize
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.abi_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(32, XLEN);
        const_assert!(LEN > 1);
    }

    #[test]
    fn test_write_to_zero() {
        let mut registers = Registers::default();
        registers.set_x(Specifier::X0, 0xDEADBEEF);
        assert_eq!(0, registers.x(Specifier::X0));
        assert_eq!(0, registers.replace_x(Specifier::X0, 1));
        assert_eq!(0, registers.x(Specifier::X0));
    }

    #[test]
    fn test_initial_pc() {
        let mut registers = Registers::new(0x8000_0000);
        assert_eq!(0x8000_0000, registers.pc());
        registers.set_pc(0x8000_0004);
        assert_eq!(0x8000_0004, registers.pc());
        assert!(registers.iter().all(|(_, value)| value == 0));
    }

    #[test]
    fn test_replace_x() {
        let mut registers = Registers::default();
        for i in 1..LEN {
            assert_eq!(0, registers.replace_x(Specifier::from_u5(i), i as u32));
        }
        for i in 1..LEN {
            assert_eq!(
                i as u32,
                registers.replace_x(Specifier::from_u5(i), i as u32 + 1)
            );
        }
        assert_eq!(0, registers.x(Specifier::X0));
    }

    #[test]
    fn test_equality_covers_pc() {
        let mut a = Registers::new(4);
        let b = Registers::new(8);
        assert_ne!(a, b);
        a.set_pc(8);
        assert_eq!(a, b);
        a.set_x(Specifier::A0, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_abi_names() {
        assert_eq!("zero", Specifier::X0.to_string());
        assert_eq!("a0", Specifier::A0.to_string());
        assert_eq!("t6", Specifier::from_u5(31).to_string());
        assert_eq!(None, Specifier::new(32));
        assert_eq!(Some(Specifier::A5), Specifier::new(15u32));
    }
}
