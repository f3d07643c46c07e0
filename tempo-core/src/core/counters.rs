/// Cycle and retirement counters of a hart, plus timing statistics that have no CSR.
///
/// > The cycle, instret, and hpmcountern CSRs are read-only shadows of mcycle, minstret, and
/// > mhpmcountern, respectively.
///
/// `mcycle` advances once per hart step, i.e. once per board tick. A CSR write to `mcycle` or
/// `minstret` replaces the counter, and the increment for the writing instruction is skipped.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    mcycle: u64,
    minstret: u64,
    stalled: u64,
    busy: u64,
    skip_next_mcycle_increment: bool,
    skip_next_minstret_increment: bool,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_cycle(&mut self) {
        if !std::mem::take(&mut self.skip_next_mcycle_increment) {
            self.mcycle = self.mcycle.wrapping_add(1);
        }
    }

    pub fn increment_instret(&mut self) {
        if !std::mem::take(&mut self.skip_next_minstret_increment) {
            self.minstret = self.minstret.wrapping_add(1);
        }
    }

    pub fn increment_stalled(&mut self) {
        self.stalled += 1;
    }

    pub fn increment_busy(&mut self) {
        self.busy += 1;
    }

    pub fn cycles(&self) -> u64 {
        self.mcycle
    }

    pub fn instret(&self) -> u64 {
        self.minstret
    }

    /// Cycles spent suspended on a pending operation.
    pub fn stalled(&self) -> u64 {
        self.stalled
    }

    /// Cycles spent waiting for the latency of a completed instruction to elapse.
    pub fn busy(&self) -> u64 {
        self.busy
    }

    pub fn write_mcycle(&mut self, value: u32, mask: u32) {
        self.mcycle = replace_low(self.mcycle, value, mask);
        self.skip_next_mcycle_increment = true;
    }

    pub fn write_mcycleh(&mut self, value: u32, mask: u32) {
        self.mcycle = replace_high(self.mcycle, value, mask);
        self.skip_next_mcycle_increment = true;
    }

    pub fn write_minstret(&mut self, value: u32, mask: u32) {
        self.minstret = replace_low(self.minstret, value, mask);
        self.skip_next_minstret_increment = true;
    }

    pub fn write_minstreth(&mut self, value: u32, mask: u32) {
        self.minstret = replace_high(self.minstret, value, mask);
        self.skip_next_minstret_increment = true;
    }
}

fn replace_low(counter: u64, value: u32, mask: u32) -> u64 {
    let low = counter as u32 & !mask | value & mask;
    counter & 0xFFFF_FFFF_0000_0000 | low as u64
}

fn replace_high(counter: u64, value: u32, mask: u32) -> u64 {
    let high = (counter >> 32) as u32 & !mask | value & mask;
    (high as u64) << 32 | counter & 0xFFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_suppress_one_increment() {
        let mut counters = Counters::new();
        counters.increment_instret();
        counters.write_minstret(100, u32::MAX);
        counters.increment_instret();
        assert_eq!(100, counters.instret());
        counters.increment_instret();
        assert_eq!(101, counters.instret());
    }

    #[test]
    fn high_half_writes() {
        let mut counters = Counters::new();
        counters.write_mcycle(0xFFFF_FFFF, u32::MAX);
        counters.write_mcycleh(0x1, u32::MAX);
        assert_eq!(0x1_FFFF_FFFF, counters.cycles());
        counters.increment_cycle();
        counters.increment_cycle();
        assert_eq!(0x2_0000_0000, counters.cycles());
    }
}
