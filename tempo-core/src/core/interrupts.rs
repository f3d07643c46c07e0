use bitvec::{array::BitArray, field::BitField, order::Lsb0};

use super::Interrupt;

const MACHINE_SOFTWARE_INTERRUPT: usize = Interrupt::MachineSoftwareInterrupt as usize;
const MACHINE_TIMER_INTERRUPT: usize = Interrupt::MachineTimerInterrupt as usize;
const MACHINE_EXTERNAL_INTERRUPT: usize = Interrupt::MachineExternalInterrupt as usize;

#[allow(clippy::identity_op)]
const VALID_INTERRUPTS_MASK: u16 = 0
    | (1 << MACHINE_SOFTWARE_INTERRUPT)
    | (1 << MACHINE_TIMER_INTERRUPT)
    | (1 << MACHINE_EXTERNAL_INTERRUPT);

/// Interrupts in the order they are taken when several are deliverable at once.
const PRIORITY: [Interrupt; 3] = [
    Interrupt::MachineExternalInterrupt,
    Interrupt::MachineSoftwareInterrupt,
    Interrupt::MachineTimerInterrupt,
];

/// Pending (`mip`) and enabled (`mie`) interrupts of a hart.
///
/// All pending bits are driven by interrupt lines, so writes to `mip` from guest code are ignored.
#[derive(Debug, Clone)]
pub struct Interrupts {
    mip: BitArray<[u16; 1], Lsb0>,
    mie: BitArray<[u16; 1], Lsb0>,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            mip: BitArray::new([0x0000]),
            mie: BitArray::new([0x0000]),
        }
    }

    /// Set the level of the line driving `interrupt`.
    pub fn set_pending(&mut self, interrupt: Interrupt, level: bool) {
        self.mip.set(interrupt as usize, level);
    }

    pub fn is_pending(&self, interrupt: Interrupt) -> bool {
        self.mip[interrupt as usize]
    }

    pub fn read_mip(&self) -> u32 {
        self.mip.load_le::<u16>() as u32
    }

    pub fn read_mie(&self) -> u32 {
        self.mie.load_le::<u16>() as u32
    }

    /// The mie register is **WARL**.
    pub fn write_mie(&mut self, value: u32, mask: u32) {
        let mask = mask as u16 & VALID_INTERRUPTS_MASK;
        let mie = self.mie.load_le::<u16>();
        self.mie.store_le(mie & !mask | value as u16 & mask);
    }

    /// Bitmask of interrupts that are both pending and enabled, regardless of `mstatus.MIE`.
    pub fn pending_enabled(&self) -> u32 {
        (self.mip & self.mie).load_le::<u16>() as u32
    }

    /// The pending and enabled interrupt with the highest priority.
    pub fn highest_priority(&self) -> Option<Interrupt> {
        let pending = self.mip & self.mie;
        PRIORITY
            .into_iter()
            .find(|&interrupt| pending[interrupt as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_requires_enable() {
        let mut interrupts = Interrupts::new();
        interrupts.set_pending(Interrupt::MachineTimerInterrupt, true);
        assert_eq!(1 << 7, interrupts.read_mip());
        assert_eq!(0, interrupts.pending_enabled());
        assert_eq!(None, interrupts.highest_priority());
        interrupts.write_mie(u32::MAX, 1 << 7);
        assert_eq!(1 << 7, interrupts.pending_enabled());
        assert_eq!(
            Some(Interrupt::MachineTimerInterrupt),
            interrupts.highest_priority()
        );
    }

    #[test]
    fn mie_only_holds_machine_interrupts() {
        let mut interrupts = Interrupts::new();
        interrupts.write_mie(u32::MAX, u32::MAX);
        assert_eq!(0x888, interrupts.read_mie());
        interrupts.write_mie(0, 1 << 3);
        assert_eq!(0x880, interrupts.read_mie());
    }

    #[test]
    fn priority_order() {
        let mut interrupts = Interrupts::new();
        interrupts.write_mie(u32::MAX, u32::MAX);
        interrupts.set_pending(Interrupt::MachineTimerInterrupt, true);
        interrupts.set_pending(Interrupt::MachineSoftwareInterrupt, true);
        assert_eq!(
            Some(Interrupt::MachineSoftwareInterrupt),
            interrupts.highest_priority()
        );
        interrupts.set_pending(Interrupt::MachineExternalInterrupt, true);
        assert_eq!(
            Some(Interrupt::MachineExternalInterrupt),
            interrupts.highest_priority()
        );
        interrupts.set_pending(Interrupt::MachineExternalInterrupt, false);
        interrupts.set_pending(Interrupt::MachineSoftwareInterrupt, false);
        assert!(interrupts.is_pending(Interrupt::MachineTimerInterrupt));
        assert_eq!(
            Some(Interrupt::MachineTimerInterrupt),
            interrupts.highest_priority()
        );
    }
}
