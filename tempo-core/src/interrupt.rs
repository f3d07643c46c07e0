//! Interrupt lines between peripherals and harts.

use crate::core::Interrupt;
use crate::HartId;

/// Receiving end of a set of level-triggered interrupt lines, one per `(hart, interrupt)` pair.
pub trait IrqSink {
    fn raise(&mut self, hart: HartId, interrupt: Interrupt);

    fn lower(&mut self, hart: HartId, interrupt: Interrupt);
}

/// A recorded change of one interrupt line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LineChange {
    pub hart: HartId,
    pub interrupt: Interrupt,
    pub level: bool,
}

impl LineChange {
    /// Forward this change to `sink`.
    pub fn apply(self, sink: &mut impl IrqSink) {
        if self.level {
            sink.raise(self.hart, self.interrupt);
        } else {
            sink.lower(self.hart, self.interrupt);
        }
    }
}

/// Collects line changes in order, e.g. to observe what a peripheral drives.
impl IrqSink for Vec<LineChange> {
    fn raise(&mut self, hart: HartId, interrupt: Interrupt) {
        self.push(LineChange {
            hart,
            interrupt,
            level: true,
        });
    }

    fn lower(&mut self, hart: HartId, interrupt: Interrupt) {
        self.push(LineChange {
            hart,
            interrupt,
            level: false,
        });
    }
}
