use log::trace;
use std::fmt::Debug;

/// Trait for types that can be simulated by [`Simulator`].
pub trait Simulatable: Debug {
    /// Fatal condition that aborts the simulation.
    type Error;

    /// Advance the simulation one tick. This operation should be deterministic.
    fn tick(&mut self) -> Result<(), Self::Error>;
}

/// Reason [`Simulator::run`] returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RunExit {
    /// The stop condition became true.
    Stopped,
    /// The tick limit was reached first.
    LimitReached,
}

/// Drives a [`Simulatable`] and keeps track of the number of ticks simulated.
#[derive(Debug)]
pub struct Simulator<S: Simulatable> {
    simulatable: S,
    ticks: u64,
}

impl<S: Simulatable> Simulator<S> {
    pub fn new(simulatable: S) -> Self {
        Self {
            simulatable,
            ticks: 0,
        }
    }

    /// Number of ticks simulated so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn inspect(&self) -> &S {
        &self.simulatable
    }

    pub fn inspect_mut(&mut self) -> &mut S {
        &mut self.simulatable
    }

    pub fn into_inner(self) -> S {
        self.simulatable
    }

    /// Advance the simulation by one tick.
    pub fn step(&mut self) -> Result<(), S::Error> {
        self.simulatable.tick()?;
        self.ticks += 1;
        Ok(())
    }

    /// Tick until `stop` returns `true` (checked before every tick) or `max_ticks` ticks have been
    /// simulated by this call.
    pub fn run<F>(&mut self, max_ticks: u64, mut stop: F) -> Result<RunExit, S::Error>
    where
        F: FnMut(&S) -> bool,
    {
        for _ in 0..max_ticks {
            if stop(&self.simulatable) {
                trace!("Simulation stopped after {} ticks", self.ticks);
                return Ok(RunExit::Stopped);
            }
            self.step()?;
        }
        if stop(&self.simulatable) {
            Ok(RunExit::Stopped)
        } else {
            Ok(RunExit::LimitReached)
        }
    }
}
