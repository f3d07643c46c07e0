//! Scoreboard of in-flight operations on a pipelined multi-cycle functional unit.

use crate::registers::Specifier;
use crate::Cycle;

/// One operation issued to a functional unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OccupancyEntry {
    /// Address of the issuing instruction.
    pub pc: u32,
    /// Nominal latency of the operation.
    pub latency: u32,
    pub start: Cycle,
    pub end: Cycle,
    pub dest: Specifier,
}

/// Fixed-depth table of the last operations issued to one functional unit.
///
/// The depth is the number of operations the unit can keep in flight. When the table is full the
/// entry with the smallest `end` is evicted; on ties the lowest slot index is evicted. The tie
/// rule follows the observed timing of the modelled hardware and is not an architectural
/// guarantee.
#[derive(Debug, Clone)]
pub struct OccupancyTracker {
    slots: Box<[Option<OccupancyEntry>]>,
}

impl OccupancyTracker {
    /// Create an empty tracker.
    ///
    /// # Panics
    ///
    /// Panics if `depth` is zero.
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "occupancy tracker needs a depth of at least one");
        Self {
            slots: vec![None; depth].into_boxed_slice(),
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over `(slot, entry)` pairs of the occupied slots.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &OccupancyEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|entry| (index, entry)))
    }

    /// Store `entry` in the first empty slot, or in place of the entry that ends first.
    /// Returns the evicted entry.
    pub fn record(&mut self, entry: OccupancyEntry) -> Option<OccupancyEntry> {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(entry);
            return None;
        }
        let mut victim = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            if let (Some(candidate), Some(current)) = (slot, &self.slots[victim]) {
                // Strict comparison keeps the first index on ties.
                if candidate.end < current.end {
                    victim = index;
                }
            }
        }
        self.slots[victim].replace(entry)
    }

    /// Latency of an operation with nominal latency `declared` issued at `now` reading `sources`.
    ///
    /// An in-flight operation producing one of `sources` forces the full nominal latency. An
    /// unrelated one lets the new operation reuse its slot, which costs the time until that slot
    /// frees up plus the amount by which the new operation is slower. The result is the minimum
    /// over all entries and `declared`, and never negative.
    pub fn effective_latency(&self, now: Cycle, declared: u32, sources: &[Specifier]) -> u32 {
        let declared_signed = i64::from(declared);
        let mut latency = declared_signed;
        for (_, entry) in self.entries() {
            let dependent = entry.dest != Specifier::X0 && sources.contains(&entry.dest);
            let contribution = if dependent {
                declared_signed
            } else {
                now as i64 - (entry.end as i64 + 1)
                    + (declared_signed - i64::from(entry.latency)).max(0)
            };
            latency = latency.min(contribution);
        }
        latency.clamp(0, declared_signed) as u32
    }
}

/// Functional units modelled by a hart.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FunctionalUnit {
    Multiplier,
    Divider,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(end: Cycle, dest: Specifier) -> OccupancyEntry {
        OccupancyEntry {
            pc: end as u32 * 4,
            latency: 3,
            start: end.saturating_sub(3),
            end,
            dest,
        }
    }

    #[test]
    fn fills_empty_slots_first() {
        let mut tracker = OccupancyTracker::new(2);
        assert_eq!(None, tracker.record(entry(10, Specifier::A0)));
        assert_eq!(None, tracker.record(entry(5, Specifier::A1)));
        assert_eq!(2, tracker.entries().count());
    }

    #[test]
    fn evicts_smallest_end() {
        let mut tracker = OccupancyTracker::new(3);
        tracker.record(entry(5, Specifier::A0));
        tracker.record(entry(2, Specifier::A1));
        tracker.record(entry(9, Specifier::A2));
        assert_eq!(
            Some(entry(2, Specifier::A1)),
            tracker.record(entry(12, Specifier::A3))
        );
        let slots: Vec<_> = tracker.entries().map(|(i, e)| (i, e.end)).collect();
        assert_eq!(vec![(0, 5), (1, 12), (2, 9)], slots);
    }

    #[test]
    fn eviction_ties_go_to_lowest_index() {
        let mut tracker = OccupancyTracker::new(3);
        tracker.record(entry(7, Specifier::A0));
        tracker.record(entry(4, Specifier::A1));
        tracker.record(entry(4, Specifier::A2));
        assert_eq!(
            Some(entry(4, Specifier::A1)),
            tracker.record(entry(8, Specifier::A3))
        );
    }

    #[test]
    fn empty_tracker_costs_declared_latency() {
        let tracker = OccupancyTracker::new(3);
        assert_eq!(3, tracker.effective_latency(100, 3, &[Specifier::A0]));
    }

    #[test]
    fn dependency_costs_declared_latency() {
        let mut tracker = OccupancyTracker::new(1);
        tracker.record(OccupancyEntry {
            pc: 0,
            latency: 3,
            start: 10,
            end: 13,
            dest: Specifier::A0,
        });
        assert_eq!(3, tracker.effective_latency(11, 3, &[Specifier::A0]));
        // Independent operations overlap with the in-flight one.
        assert_eq!(0, tracker.effective_latency(11, 3, &[Specifier::A1]));
        // A slower operation pays the difference.
        assert_eq!(5, tracker.effective_latency(12, 10, &[Specifier::A1]));
    }

    #[test]
    fn zero_register_is_never_a_dependency() {
        let mut tracker = OccupancyTracker::new(1);
        tracker.record(entry(13, Specifier::X0));
        assert_eq!(0, tracker.effective_latency(11, 3, &[Specifier::X0]));
    }

    fn specifier() -> impl Strategy<Value = Specifier> {
        (0u8..32).prop_map(Specifier::from_u5)
    }

    proptest! {
        #[test]
        fn latency_is_bounded_by_declared(
            depth in 1usize..4,
            entries in prop::collection::vec(
                (0u64..1_000, 0u32..64, specifier()),
                0..8,
            ),
            now in 0u64..1_200,
            declared in 0u32..64,
            sources in prop::collection::vec(specifier(), 0..3),
        ) {
            let mut tracker = OccupancyTracker::new(depth);
            for (start, latency, dest) in entries {
                tracker.record(OccupancyEntry {
                    pc: 0,
                    latency,
                    start,
                    end: start + u64::from(latency),
                    dest,
                });
            }
            let latency = tracker.effective_latency(now, declared, &sources);
            prop_assert!(latency <= declared);
        }
    }
}
