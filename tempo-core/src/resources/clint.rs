//! Core Local Interruptor

use crate::bus::Bus;
use crate::core::Interrupt;
use crate::interrupt::{IrqSink, LineChange};
use crate::{ConfigError, Cycle, HartId};
use log::debug;

// SiFive CLINT register layout, as used by QEMU's `sifive_clint`/`riscv_aclint`.
pub const MSIP_BASE: u32 = 0x0000;
pub const MTIMECMP_BASE: u32 = 0x4000;
pub const MTIME: u32 = 0xBFF8;
/// Size of the address window of the CLINT.
pub const SIZE: u32 = 0x1_0000;
/// Number of harts whose `mtimecmp` fits below `mtime`.
pub const MAX_HARTS: usize = ((MTIME - MTIMECMP_BASE) / 8) as usize;

const_assert!(MAX_HARTS * 4 <= (MTIMECMP_BASE - MSIP_BASE) as usize);

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClintConfig {
    /// Board ticks per `resolution` period.
    pub tick_period: u64,
    /// `mtime` advances by `tick_period / resolution` per board tick.
    pub resolution: u64,
}

impl Default for ClintConfig {
    fn default() -> Self {
        Self {
            tick_period: 1,
            resolution: 1,
        }
    }
}

/// Free-running `mtime`, per-hart `mtimecmp` and `msip` registers, driving the machine timer and
/// software interrupt lines of each hart.
///
/// `mtime` is not stored, but derived from the current tick whenever it is read. Instead of
/// comparing on every tick, writing `mtime` or a `mtimecmp` computes the tick at which each timer
/// line has to go high, and [`advance`](Self::advance) re-evaluates the harts whose deadline
/// passed.
///
/// Line changes are queued and handed out by [`drain_lines`](Self::drain_lines).
#[derive(Debug, Clone)]
pub struct Clint {
    config: ClintConfig,
    msip: Box<[bool]>,
    mtimecmp: Box<[u64]>,
    /// Value of `mtime` at `base_time`.
    base: u64,
    base_time: Cycle,
    deadlines: Box<[Option<Cycle>]>,
    timer_lines: Box<[bool]>,
    changes: Vec<LineChange>,
}

impl Clint {
    /// Create a CLINT in reset state for `harts` harts.
    pub fn new(harts: usize, config: ClintConfig) -> Result<Self, ConfigError> {
        if harts == 0 {
            return Err(ConfigError::NoHarts);
        }
        if harts > MAX_HARTS {
            return Err(ConfigError::TooManyHarts(harts));
        }
        if config.resolution == 0 || config.tick_period == 0 {
            return Err(ConfigError::ZeroTimebase);
        }
        Ok(Self {
            config,
            msip: vec![false; harts].into_boxed_slice(),
            mtimecmp: vec![u64::MAX; harts].into_boxed_slice(),
            base: 0,
            base_time: 0,
            deadlines: vec![None; harts].into_boxed_slice(),
            timer_lines: vec![false; harts].into_boxed_slice(),
            changes: Vec::new(),
        })
    }

    pub fn harts(&self) -> usize {
        self.msip.len()
    }

    /// Restart the CLINT at tick `now`, setting everything to its reset state.
    pub fn reset(&mut self, now: Cycle) {
        for hart in 0..self.harts() {
            self.set_msip(hart, false);
            self.drive_timer(hart, false);
        }
        self.mtimecmp.fill(u64::MAX);
        self.deadlines.fill(None);
        self.base = 0;
        self.base_time = now;
    }

    /// Value of `mtime` at tick `now`.
    pub fn mtime(&self, now: Cycle) -> u64 {
        let elapsed = u128::from(now.saturating_sub(self.base_time));
        let ticks = elapsed * u128::from(self.config.tick_period) / u128::from(self.config.resolution);
        self.base.wrapping_add(ticks as u64)
    }

    pub fn mtimecmp(&self, hart: HartId) -> u64 {
        self.mtimecmp[hart]
    }

    /// Tick at which the timer line of `hart` is due to be re-evaluated.
    pub fn deadline(&self, hart: HartId) -> Option<Cycle> {
        self.deadlines[hart]
    }

    /// Re-evaluate every hart whose deadline is at or before `now`.
    pub fn advance(&mut self, now: Cycle) {
        for hart in 0..self.harts() {
            if self.deadlines[hart].is_some_and(|deadline| deadline <= now) {
                self.evaluate(now, hart);
            }
        }
    }

    /// Forward the queued line changes to `sink`, in the order they happened.
    pub fn drain_lines(&mut self, sink: &mut impl IrqSink) {
        for change in self.changes.drain(..) {
            change.apply(sink);
        }
    }

    fn evaluate_all(&mut self, now: Cycle) {
        for hart in 0..self.harts() {
            self.evaluate(now, hart);
        }
    }

    fn evaluate(&mut self, now: Cycle, hart: HartId) {
        let mtime = self.mtime(now);
        let mtimecmp = self.mtimecmp[hart];
        let level = mtime >= mtimecmp;
        // An all-ones mtimecmp is never reached by a running timer.
        self.deadlines[hart] = if level || mtimecmp == u64::MAX {
            None
        } else {
            // Rounded up, so the line is never evaluated before mtime reaches mtimecmp.
            let ticks = u128::from(mtimecmp - mtime) * u128::from(self.config.resolution);
            let ticks = ticks.div_ceil(u128::from(self.config.tick_period)).max(1);
            Some(now.saturating_add(u64::try_from(ticks).unwrap_or(u64::MAX)))
        };
        self.drive_timer(hart, level);
    }

    fn drive_timer(&mut self, hart: HartId, level: bool) {
        if self.timer_lines[hart] != level {
            self.timer_lines[hart] = level;
            self.changes.push(LineChange {
                hart,
                interrupt: Interrupt::MachineTimerInterrupt,
                level,
            });
        }
    }

    fn set_msip(&mut self, hart: HartId, level: bool) {
        if self.msip[hart] != level {
            self.msip[hart] = level;
            self.changes.push(LineChange {
                hart,
                interrupt: Interrupt::MachineSoftwareInterrupt,
                level,
            });
        }
    }

    fn read_byte(&self, now: Cycle, address: u32) -> u8 {
        match self.register_at(address) {
            Some((Register::Msip(hart), byte)) => {
                ((self.msip[hart] as u32) >> (8 * byte)) as u8
            }
            Some((Register::Mtimecmp(hart), byte)) => (self.mtimecmp[hart] >> (8 * byte)) as u8,
            Some((Register::Mtime, byte)) => (self.mtime(now) >> (8 * byte)) as u8,
            None => 0,
        }
    }

    /// Returns `true` if the write affects the timer comparison.
    fn write_byte(&mut self, now: Cycle, address: u32, value: u8) -> bool {
        match self.register_at(address) {
            Some((Register::Msip(hart), byte)) => {
                // Only bit 0 is implemented.
                if byte == 0 {
                    self.set_msip(hart, value & 1 != 0);
                }
                false
            }
            Some((Register::Mtimecmp(hart), byte)) => {
                self.mtimecmp[hart] = replace_byte(self.mtimecmp[hart], byte, value);
                true
            }
            Some((Register::Mtime, byte)) => {
                self.base = replace_byte(self.mtime(now), byte, value);
                self.base_time = now;
                true
            }
            None => false,
        }
    }

    /// Returns the register containing `address` and the index of the byte within it.
    fn register_at(&self, address: u32) -> Option<(Register, u32)> {
        let harts = self.harts() as u32;
        if (MSIP_BASE..MSIP_BASE + 4 * harts).contains(&address) {
            let offset = address - MSIP_BASE;
            Some((Register::Msip((offset / 4) as usize), offset % 4))
        } else if (MTIMECMP_BASE..MTIMECMP_BASE + 8 * harts).contains(&address) {
            let offset = address - MTIMECMP_BASE;
            Some((Register::Mtimecmp((offset / 8) as usize), offset % 8))
        } else if (MTIME..MTIME + 8).contains(&address) {
            Some((Register::Mtime, address - MTIME))
        } else {
            None
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Register {
    Msip(HartId),
    Mtimecmp(HartId),
    Mtime,
}

fn replace_byte(register: u64, byte: u32, value: u8) -> u64 {
    let shift = 8 * byte;
    register & !(0xFF << shift) | u64::from(value) << shift
}

impl Bus for Clint {
    fn read(&mut self, now: Cycle, address: u32, buf: &mut [u8]) {
        for (offset, byte) in (0u32..).zip(buf.iter_mut()) {
            *byte = self.read_byte(now, address.wrapping_add(offset));
        }
    }

    fn write(&mut self, now: Cycle, address: u32, buf: &[u8]) {
        let mut timer_changed = false;
        for (offset, &byte) in (0u32..).zip(buf.iter()) {
            timer_changed |= self.write_byte(now, address.wrapping_add(offset), byte);
        }
        if timer_changed {
            debug!("CLINT timer registers written at tick {now}");
            self.evaluate_all(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_u64(clint: &mut Clint, now: Cycle, address: u32, value: u64) {
        clint.write(now, address, &value.to_le_bytes());
    }

    fn read_u64(clint: &mut Clint, now: Cycle, address: u32) -> u64 {
        let mut buf = [0; 8];
        clint.read(now, address, &mut buf);
        u64::from_le_bytes(buf)
    }

    fn drained(clint: &mut Clint) -> Vec<LineChange> {
        let mut changes = Vec::new();
        clint.drain_lines(&mut changes);
        changes
    }

    #[test]
    fn timer_fires_after_scaled_distance() {
        let config = ClintConfig {
            resolution: 10,
            tick_period: 2,
        };
        let mut clint = Clint::new(1, config).unwrap();
        let start = 1_000;
        write_u64(&mut clint, start, MTIME, 40);
        assert_eq!(40, read_u64(&mut clint, start, MTIME));
        write_u64(&mut clint, start, MTIMECMP_BASE, 100);
        assert!(drained(&mut clint).is_empty());
        assert_eq!(Some(start + (100 - 40) * 10 / 2), clint.deadline(0));

        clint.advance(start + 299);
        assert!(drained(&mut clint).is_empty());
        clint.advance(start + 300);
        assert_eq!(
            vec![LineChange {
                hart: 0,
                interrupt: Interrupt::MachineTimerInterrupt,
                level: true,
            }],
            drained(&mut clint)
        );
        assert_eq!(100, read_u64(&mut clint, start + 300, MTIME));
        assert_eq!(None, clint.deadline(0));
    }

    #[test]
    fn raising_mtimecmp_lowers_the_line() {
        let mut clint = Clint::new(2, ClintConfig::default()).unwrap();
        write_u64(&mut clint, 5, MTIMECMP_BASE + 8, 3);
        assert_eq!(
            vec![LineChange {
                hart: 1,
                interrupt: Interrupt::MachineTimerInterrupt,
                level: true,
            }],
            drained(&mut clint)
        );
        write_u64(&mut clint, 6, MTIMECMP_BASE + 8, 10);
        assert_eq!(
            vec![LineChange {
                hart: 1,
                interrupt: Interrupt::MachineTimerInterrupt,
                level: false,
            }],
            drained(&mut clint)
        );
        assert_eq!(Some(10), clint.deadline(1));
        assert_eq!(None, clint.deadline(0));
    }

    #[test]
    fn msip_drives_software_interrupt() {
        let mut clint = Clint::new(2, ClintConfig::default()).unwrap();
        clint.write(0, MSIP_BASE + 4, &[0xFF]);
        let mut buf = [0; 4];
        clint.read(0, MSIP_BASE + 4, &mut buf);
        assert_eq!([1, 0, 0, 0], buf);
        clint.write(0, MSIP_BASE + 4, &0u32.to_le_bytes());
        let changes = drained(&mut clint);
        assert_eq!(2, changes.len());
        assert_eq!(Interrupt::MachineSoftwareInterrupt, changes[0].interrupt);
        assert!(changes[0].level);
        assert!(!changes[1].level);
    }

    #[test]
    fn narrow_and_unmapped_accesses() {
        let mut clint = Clint::new(1, ClintConfig::default()).unwrap();
        write_u64(&mut clint, 0, MTIMECMP_BASE, 0x1122_3344_5566_7788);
        let mut buf = [0; 2];
        clint.read(0, MTIMECMP_BASE + 3, &mut buf);
        assert_eq!([0x55, 0x44], buf);
        clint.write(0, MTIMECMP_BASE + 7, &[0x00]);
        assert_eq!(0x0022_3344_5566_7788, clint.mtimecmp(0));

        // Only hart 0 exists, so the second mtimecmp is unmapped.
        assert_eq!(0, read_u64(&mut clint, 0, MTIMECMP_BASE + 8));
        write_u64(&mut clint, 0, MTIMECMP_BASE + 8, 1);
        assert_eq!(0, read_u64(&mut clint, 0, MTIMECMP_BASE + 8));
    }

    #[test]
    fn mtime_runs_from_reset() {
        let mut clint = Clint::new(1, ClintConfig::default()).unwrap();
        assert_eq!(17, read_u64(&mut clint, 17, MTIME));
        let mut high = [0; 4];
        clint.read(17, MTIME + 4, &mut high);
        assert_eq!([0; 4], high);
        clint.reset(20);
        assert_eq!(5, clint.mtime(25));
    }

    #[test]
    fn rejects_bad_configurations() {
        assert_eq!(
            ConfigError::ZeroTimebase,
            Clint::new(
                1,
                ClintConfig {
                    resolution: 0,
                    tick_period: 1,
                }
            )
            .unwrap_err()
        );
        assert_eq!(
            ConfigError::NoHarts,
            Clint::new(0, ClintConfig::default()).unwrap_err()
        );
        assert_eq!(
            ConfigError::TooManyHarts(MAX_HARTS + 1),
            Clint::new(MAX_HARTS + 1, ClintConfig::default()).unwrap_err()
        );
    }
}
