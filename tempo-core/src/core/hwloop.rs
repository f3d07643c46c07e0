//! Zero-overhead hardware loops.
//!
//! A hart has two loop slots, each described by the address of the first (`start`) and last
//! (`end`) instruction of the loop body and a remaining iteration count. Whenever the instruction
//! at `end` completes, the count is decremented and, unless it reached zero, execution continues
//! at `start` instead of the successor the instruction chose. This holds for taken branches and
//! jumps at `end` as well.

use log::debug;

/// Number of loop slots.
pub const LOOPS: usize = 2;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct LoopRegister {
    pub start: u32,
    pub end: u32,
    pub count: u32,
}

impl LoopRegister {
    pub fn is_active(&self) -> bool {
        self.count != 0
    }
}

/// Successor chosen for an instruction that may still be re-executed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Resolution {
    pc: u32,
    target: u32,
    counts: [u32; LOOPS],
}

/// Loop register bank of one hart.
///
/// [`resolve`](Self::resolve) decrements counters, which must happen once per executed
/// instruction even if its handler runs several times because it stalled. The decision is cached
/// until the hart reports how the instruction ended:
/// - [`retire`](Self::retire) when it completed,
/// - [`rollback`](Self::rollback) when it raised an exception (the counters are restored, since
///   the instruction will be executed again after the trap),
/// - [`release`](Self::release) when its wait was interrupted and the instruction keeps the target
///   itself.
#[derive(Debug, Clone, Default)]
pub struct LoopController {
    slots: [LoopRegister; LOOPS],
    pending: Option<Resolution>,
    redirects: u64,
}

impl LoopController {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if `index >= LOOPS`.
    pub fn slot(&self, index: usize) -> &LoopRegister {
        &self.slots[index]
    }

    /// # Panics
    ///
    /// Panics if `index >= LOOPS`.
    pub fn slot_mut(&mut self, index: usize) -> &mut LoopRegister {
        &mut self.slots[index]
    }

    /// Configure a complete loop at once.
    pub fn setup(&mut self, index: usize, start: u32, end: u32, count: u32) {
        debug!("Loop {index} set up: [{start:#010x}, {end:#010x}] x{count}");
        self.slots[index] = LoopRegister { start, end, count };
    }

    /// Number of times a loop end redirected execution to a loop start.
    pub fn redirects(&self) -> u64 {
        self.redirects
    }

    /// Returns the sequential successor of the instruction at `pc`.
    pub fn resolve(&mut self, pc: u32) -> u32 {
        self.resolve_from(pc, pc.wrapping_add(4))
    }

    /// Returns the successor of the instruction at `pc`, which on its own would continue at
    /// `successor`.
    ///
    /// Slot 0 is evaluated first. Slot 1 is only evaluated if slot 0 doesn't end at `pc`, is
    /// inactive, or runs out on this visit. Repeated calls for the same `pc` return the cached
    /// target without touching the counters.
    pub fn resolve_from(&mut self, pc: u32, successor: u32) -> u32 {
        if let Some(resolution) = self.pending {
            if resolution.pc == pc {
                return resolution.target;
            }
        }
        let counts = self.slots.map(|slot| slot.count);
        let mut target = successor;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.end != pc || !slot.is_active() {
                continue;
            }
            slot.count -= 1;
            if slot.is_active() {
                debug!("Loop {index} at {pc:#010x} branches to {:#010x}", slot.start);
                target = slot.start;
                self.redirects += 1;
                break;
            }
        }
        self.pending = Some(Resolution { pc, target, counts });
        target
    }

    pub fn retire(&mut self) {
        self.pending = None;
    }

    pub fn rollback(&mut self) {
        if let Some(resolution) = self.pending.take() {
            for (slot, count) in self.slots.iter_mut().zip(resolution.counts) {
                slot.count = count;
            }
        }
    }

    pub fn release(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_zero_has_priority() {
        let mut loops = LoopController::new();
        loops.setup(0, 100, 200, 2);
        loops.setup(1, 50, 200, 5);

        assert_eq!(100, loops.resolve(200));
        loops.retire();
        assert_eq!((1, 5), (loops.slot(0).count, loops.slot(1).count));

        // Slot 0 runs out, slot 1 is evaluated on the same visit.
        assert_eq!(50, loops.resolve(200));
        loops.retire();
        assert_eq!((0, 4), (loops.slot(0).count, loops.slot(1).count));

        assert_eq!(50, loops.resolve(200));
        loops.retire();
        assert_eq!((0, 3), (loops.slot(0).count, loops.slot(1).count));
    }

    #[test]
    fn falls_through_outside_loop_ends() {
        let mut loops = LoopController::new();
        loops.setup(0, 0x10, 0x20, 3);
        assert_eq!(0x14, loops.resolve(0x10));
        loops.retire();
        assert_eq!(3, loops.slot(0).count);
    }

    #[test]
    fn last_iteration_falls_through() {
        let mut loops = LoopController::new();
        loops.setup(0, 0x10, 0x20, 2);
        assert_eq!(0x10, loops.resolve(0x20));
        loops.retire();
        assert_eq!(0x24, loops.resolve(0x20));
        loops.retire();
        assert!(!loops.slot(0).is_active());
        assert_eq!(0x24, loops.resolve(0x20));
        assert_eq!(1, loops.redirects());
    }

    #[test]
    fn taken_branch_at_loop_end() {
        let mut loops = LoopController::new();
        loops.setup(0, 0x10, 0x20, 2);
        assert_eq!(0x10, loops.resolve_from(0x20, 0x40));
        loops.retire();
        assert_eq!(1, loops.slot(0).count);
        // The last visit keeps the branch target.
        assert_eq!(0x40, loops.resolve_from(0x20, 0x40));
        loops.retire();
        assert_eq!(0, loops.slot(0).count);
        assert_eq!(0x40, loops.resolve_from(0x20, 0x40));
    }

    #[test]
    fn zero_count_never_branches() {
        let mut loops = LoopController::new();
        loops.setup(0, 0x10, 0x20, 0);
        assert_eq!(0x24, loops.resolve(0x20));
        assert_eq!(0, loops.slot(0).count);
    }

    #[test]
    fn repeated_resolution_is_cached() {
        let mut loops = LoopController::new();
        loops.setup(0, 0x10, 0x20, 3);
        assert_eq!(0x10, loops.resolve(0x20));
        assert_eq!(0x10, loops.resolve(0x20));
        assert_eq!(0x10, loops.resolve(0x20));
        assert_eq!(2, loops.slot(0).count);
        loops.retire();
        assert_eq!(0x10, loops.resolve(0x20));
        assert_eq!(1, loops.slot(0).count);
    }

    #[test]
    fn rollback_restores_counters() {
        let mut loops = LoopController::new();
        loops.setup(0, 0x10, 0x20, 1);
        loops.setup(1, 0x08, 0x20, 2);
        assert_eq!(0x08, loops.resolve(0x20));
        assert_eq!((0, 1), (loops.slot(0).count, loops.slot(1).count));
        loops.rollback();
        assert_eq!((1, 2), (loops.slot(0).count, loops.slot(1).count));
        // Nothing cached anymore, so the next visit decides again.
        assert_eq!(0x08, loops.resolve(0x20));
        assert_eq!((0, 1), (loops.slot(0).count, loops.slot(1).count));
    }

    #[test]
    fn release_keeps_counters() {
        let mut loops = LoopController::new();
        loops.setup(0, 0x10, 0x20, 3);
        loops.resolve(0x20);
        loops.release();
        assert_eq!(2, loops.slot(0).count);
        loops.resolve(0x20);
        assert_eq!(1, loops.slot(0).count);
    }
}
