//! Provides a generic board: a number of harts sharing RAM and a CLINT, each hart optionally
//! paired with an accelerator on its offload channel.

mod system_bus;

use crate::core::stall::ResumeData;
use crate::core::{Hart, Interrupt};
use crate::interrupt::IrqSink;
use crate::resources::accelerator::{Accelerator, AcceleratorConfig};
use crate::resources::clint::{self, Clint, ClintConfig};
use crate::resources::ram::Ram;
use crate::simulator::Simulatable;
use crate::{ConfigError, Cycle, HartId, ProtocolViolation};
use log::{debug, trace};
use std::ops::Range;
use system_bus::SystemBus;

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of harts, with ids `0..harts`.
    pub harts: usize,
    pub ram_base: u32,
    /// Size of RAM in bytes (max 4 GiB, and must fit the address space above `ram_base`).
    pub ram_size: usize,
    /// Ticks between issuing a RAM access and the hart being told it completed. With `0`, RAM
    /// accesses complete in the tick they are issued.
    pub memory_latency: u64,
    pub clint_base: u32,
    pub clint: ClintConfig,
    /// If set, every hart gets its own accelerator.
    pub accelerator: Option<AcceleratorConfig>,
    /// Template for the configuration of each hart. The hart id is filled in by the board.
    pub core: crate::core::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            harts: 1,
            ram_base: 0x8000_0000,
            ram_size: 0x0100_0000,
            memory_latency: 0,
            clint_base: 0x0200_0000,
            clint: ClintConfig::default(),
            accelerator: None,
            core: crate::core::Config::default(),
        }
    }
}

/// RISC-V hardware platform with one or more harts on a single clock.
///
/// > A RISC-V hardware platform can contain one or more RISC-V-compatible processing cores together
/// > with other non-RISC-V-compatible cores, fixed-function accelerators, various physical memory
/// > structures, I/O devices, and an interconnect structure to allow the components to communicate.
///
/// Each [tick](Simulatable::tick) first delivers everything that became due (RAM completions,
/// timer deadlines, accelerator responses), then steps every hart in order of its id.
#[derive(Debug)]
pub struct Board {
    now: Cycle,
    harts: Vec<Hart>,
    accelerators: Vec<Accelerator>,
    system_bus: SystemBus,
}

impl Board {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        if config.harts == 0 {
            return Err(ConfigError::NoHarts);
        }
        let ram_end = u64::from(config.ram_base) + config.ram_size as u64;
        if ram_end > 1 << 32 {
            return Err(ConfigError::InvalidRamSize(config.ram_size));
        }
        let ram = Ram::new(config.ram_size).ok_or(ConfigError::InvalidRamSize(config.ram_size))?;

        let clint_start = u64::from(config.clint_base);
        let clint_end = clint_start + u64::from(clint::SIZE);
        if u64::from(config.ram_base) < clint_end && clint_start < ram_end {
            return Err(ConfigError::Overlap {
                ram: config.ram_base,
                clint: config.clint_base,
            });
        }
        let clint = Clint::new(config.harts, config.clint)?;

        let harts = (0..config.harts)
            .map(|hart_id| {
                Hart::new(crate::core::Config {
                    hart_id,
                    ..config.core.clone()
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let accelerators = match config.accelerator {
            Some(accelerator) => (0..config.harts)
                .map(|_| Accelerator::new(accelerator.clone()))
                .collect(),
            None => Vec::new(),
        };

        debug!(
            "Board with {} harts, {:#x} bytes of RAM at {:#010x}, CLINT at {:#010x}",
            config.harts, config.ram_size, config.ram_base, config.clint_base
        );

        Ok(Self {
            now: 0,
            harts,
            accelerators,
            system_bus: SystemBus::new(
                config.ram_base,
                ram,
                config.clint_base,
                clint,
                config.memory_latency,
            ),
        })
    }

    /// The tick that will be simulated next.
    pub fn now(&self) -> Cycle {
        self.now
    }

    pub fn harts(&self) -> &[Hart] {
        &self.harts
    }

    pub fn hart(&self, id: HartId) -> Option<&Hart> {
        self.harts.get(id)
    }

    pub fn hart_mut(&mut self, id: HartId) -> Option<&mut Hart> {
        self.harts.get_mut(id)
    }

    /// The accelerators, indexed by hart id. Empty if the board has none.
    pub fn accelerators(&self) -> &[Accelerator] {
        &self.accelerators
    }

    pub fn ram(&self) -> &Ram {
        &self.system_bus.ram
    }

    pub fn clint(&self) -> &Clint {
        &self.system_bus.clint
    }

    /// Number of RAM accesses that have been issued but not yet reported to their hart.
    pub fn memory_in_flight(&self) -> usize {
        self.system_bus.in_flight()
    }

    /// `true` once every hart halted.
    pub fn all_halted(&self) -> bool {
        self.harts.iter().all(Hart::is_halted)
    }

    /// Force board back to its reset state, at tick `0`.
    pub fn reset(&mut self) {
        self.now = 0;
        for hart in &mut self.harts {
            hart.reset();
        }
        for accelerator in &mut self.accelerators {
            accelerator.reset();
        }
        self.system_bus.reset();
        self.system_bus.ram.reset();
        self.system_bus.clint.reset(0);
        self.drain_interrupt_lines();
    }

    /// Write a byte buffer into the physical address space.
    ///
    /// Bytes that fall outside RAM are ignored.
    pub fn load_physical(&mut self, base_address: u32, buf: &[u8]) {
        if let Some((range, ram_address)) = self.ram_window(base_address, buf.len()) {
            self.system_bus.ram.write(ram_address, &buf[range]);
        }
    }

    /// Read a byte buffer from the physical address space, without any timing.
    ///
    /// Bytes that fall outside RAM are left untouched.
    pub fn read_physical(&self, base_address: u32, buf: &mut [u8]) {
        if let Some((range, ram_address)) = self.ram_window(base_address, buf.len()) {
            self.system_bus.ram.read(&mut buf[range], ram_address);
        }
    }

    /// Part of `base_address..(base_address+len)` that lies in RAM, as a range into the buffer
    /// and the RAM address of its first byte.
    fn ram_window(&self, base_address: u32, len: usize) -> Option<(Range<usize>, u32)> {
        let ram_start = u64::from(self.system_bus.ram_base);
        let ram_end = ram_start + self.system_bus.ram.len() as u64;
        let base = u64::from(base_address);
        let start = base.max(ram_start);
        let end = (base + len as u64).min(ram_end);
        if start >= end {
            return None;
        }
        const_assert!(usize::BITS >= 32);
        let range = (start - base) as usize..(end - base) as usize;
        Some((range, (start - ram_start) as u32))
    }

    fn drain_interrupt_lines(&mut self) {
        self.system_bus
            .clint
            .drain_lines(&mut HartLines(&mut self.harts));
    }
}

impl Simulatable for Board {
    type Error = ProtocolViolation;

    fn tick(&mut self) -> Result<(), ProtocolViolation> {
        let now = self.now;
        trace!("Tick {now}");

        while let Some(completion) = self.system_bus.pop_due(now) {
            let hart = &mut self.harts[completion.hart];
            hart.resume(
                completion.ticket,
                ResumeData::Memory {
                    data: completion.data,
                },
            )?;
        }

        self.system_bus.clint.advance(now);
        self.drain_interrupt_lines();

        for (accelerator, hart) in self.accelerators.iter_mut().zip(&mut self.harts) {
            accelerator.step(now, hart)?;
        }

        for hart in &mut self.harts {
            hart.step(now, &mut self.system_bus)?;
        }

        // Lines driven by CLINT writes of this tick are seen by the harts from the next tick on.
        self.drain_interrupt_lines();

        self.now += 1;
        Ok(())
    }
}

/// Interrupt lines of the harts of a board, indexed by hart id.
struct HartLines<'a>(&'a mut [Hart]);

impl IrqSink for HartLines<'_> {
    fn raise(&mut self, hart: HartId, interrupt: Interrupt) {
        if let Some(hart) = self.0.get_mut(hart) {
            hart.set_interrupt_line(interrupt, true);
        }
    }

    fn lower(&mut self, hart: HartId, interrupt: Interrupt) {
        if let Some(hart) = self.0.get_mut(hart) {
            hart.set_interrupt_line(interrupt, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;
    use crate::core::csr;
    use crate::registers::Specifier;
    use crate::simulator::{RunExit, Simulator};

    const RAM_BASE: u32 = 0x8000_0000;

    fn board(config: Config, program: &[u32]) -> Board {
        let mut board = Board::new(Config {
            ram_size: 0x2000,
            ..config
        })
        .unwrap();
        board.load_physical(RAM_BASE, &asm::program(program));
        board
    }

    fn run(board: Board) -> Board {
        let mut simulator = Simulator::new(board);
        assert_eq!(
            Ok(RunExit::Stopped),
            simulator.run(10_000, Board::all_halted)
        );
        simulator.into_inner()
    }

    fn store_words(board: &mut Board, address: u32, words: &[u32]) {
        board.load_physical(address, &asm::program(words));
    }

    #[test]
    fn rejects_bad_configurations() {
        let config = Config {
            ram_size: 0x1000,
            ..Config::default()
        };
        assert_eq!(
            Err(ConfigError::NoHarts),
            Board::new(Config {
                harts: 0,
                ..config.clone()
            })
            .map(|_| ())
        );
        assert_eq!(
            Err(ConfigError::InvalidRamSize(0)),
            Board::new(Config {
                ram_size: 0,
                ..config.clone()
            })
            .map(|_| ())
        );
        assert_eq!(
            Err(ConfigError::InvalidRamSize(0x1000)),
            Board::new(Config {
                ram_base: 0xFFFF_F800,
                ..config.clone()
            })
            .map(|_| ())
        );
        assert_eq!(
            Err(ConfigError::Overlap {
                ram: 0x0200_8000,
                clint: 0x0200_0000,
            }),
            Board::new(Config {
                ram_base: 0x0200_8000,
                ..config.clone()
            })
            .map(|_| ())
        );
        assert!(Board::new(Config {
            ram_base: 0x0201_0000,
            ..config
        })
        .is_ok());
    }

    #[test]
    fn physical_accesses_are_clipped_to_ram() {
        let mut board = Board::new(Config {
            ram_size: 0x10,
            ..Config::default()
        })
        .unwrap();
        board.load_physical(RAM_BASE - 2, &[1, 2, 3, 4]);
        board.load_physical(RAM_BASE + 0xE, &[5, 6, 7, 8]);

        let mut buf = [0xFF; 6];
        board.read_physical(RAM_BASE - 2, &mut buf);
        assert_eq!([0xFF, 0xFF, 3, 4, 0, 0], buf);
        let mut buf = [0xFF; 4];
        board.read_physical(RAM_BASE + 0xE, &mut buf);
        assert_eq!([5, 6, 0xFF, 0xFF], buf);
    }

    #[test]
    fn memory_latency_only_changes_timing() {
        let program = [
            asm::lui(Specifier::T0, 0x8000_1000),
            asm::lp_setupi(0, 4, 8),
            asm::p_lw(Specifier::T1, Specifier::T0, 4),
            asm::add(Specifier::A0, Specifier::A0, Specifier::T1),
            asm::EBREAK,
        ];

        let mut reference = board(Config::default(), &program);
        store_words(&mut reference, 0x8000_1000, &[1, 2, 3, 4]);
        let reference = run(reference);

        let mut delayed = board(
            Config {
                memory_latency: 5,
                ..Config::default()
            },
            &program,
        );
        store_words(&mut delayed, 0x8000_1000, &[1, 2, 3, 4]);
        let delayed = run(delayed);

        let (reference_hart, delayed_hart) = (&reference.harts()[0], &delayed.harts()[0]);
        assert_eq!(10, delayed_hart.registers().x(Specifier::A0));
        assert_eq!(0x8000_1010, delayed_hart.registers().x(Specifier::T0));
        assert_eq!(reference_hart.registers(), delayed_hart.registers());
        assert_eq!(
            reference_hart.counters().instret(),
            delayed_hart.counters().instret()
        );
        assert_eq!(0, reference_hart.counters().stalled());
        assert_eq!(4 * 5, delayed_hart.counters().stalled());
        assert!(delayed.now() > reference.now());
        assert_eq!(0, delayed.memory_in_flight());
    }

    #[test]
    fn timer_interrupt_wakes_waiting_hart() {
        let program = [
            asm::lui(Specifier::T0, 0x0200_4000),
            asm::addi(Specifier::T1, Specifier::X0, 50),
            asm::sw(Specifier::T1, Specifier::T0, 0),
            asm::sw(Specifier::X0, Specifier::T0, 4),
            asm::addi(Specifier::T2, Specifier::X0, 0x80),
            asm::csrrs(Specifier::X0, csr::MIE, Specifier::T2),
            asm::WFI,
            asm::EBREAK,
        ];
        let mut simulator = Simulator::new(board(Config::default(), &program));

        assert_eq!(Ok(RunExit::LimitReached), simulator.run(50, Board::all_halted));
        let board = simulator.inspect();
        assert_eq!(Some(50), board.clint().deadline(0));
        assert!(board.harts()[0].is_suspended());
        assert_eq!(0, board.harts()[0].pending_interrupts());

        assert_eq!(Ok(RunExit::Stopped), simulator.run(10, Board::all_halted));
        let board = simulator.inspect();
        let hart = &board.harts()[0];
        assert_eq!(52, board.now());
        assert_eq!(1 << 7, hart.pending_interrupts());
        assert_eq!(0, hart.traps_taken());
        assert_eq!(50, board.clint().mtimecmp(0));
    }

    #[test]
    fn software_interrupt_between_harts() {
        let program = [
            asm::csrr(Specifier::A0, csr::MHARTID),
            asm::bne(Specifier::A0, Specifier::X0, 20),
            // Hart 0 raises the software interrupt of hart 1.
            asm::lui(Specifier::T0, 0x0200_0000),
            asm::addi(Specifier::T1, Specifier::X0, 1),
            asm::sw(Specifier::T1, Specifier::T0, 4),
            asm::EBREAK,
            // Every other hart waits for it.
            asm::addi(Specifier::T2, Specifier::X0, 0x8),
            asm::csrrs(Specifier::X0, csr::MIE, Specifier::T2),
            asm::WFI,
            asm::EBREAK,
        ];
        let board = run(board(
            Config {
                harts: 2,
                ..Config::default()
            },
            &program,
        ));

        let [first, second] = board.harts() else {
            panic!("expected two harts");
        };
        assert_eq!(0, first.registers().x(Specifier::A0));
        assert_eq!(1, second.registers().x(Specifier::A0));
        assert_eq!(0, first.pending_interrupts());
        assert_eq!(1 << 3, second.pending_interrupts());
        assert_eq!(RAM_BASE + 0x24, second.registers().pc());
    }

    #[test]
    fn offload_through_accelerator() {
        let program = [
            asm::addi(Specifier::A1, Specifier::X0, 20),
            asm::addi(Specifier::A2, Specifier::X0, 22),
            asm::offload(0, Specifier::A0, Specifier::A1, Specifier::A2),
            asm::offload(2, Specifier::A3, Specifier::A0, Specifier::A1),
            asm::EBREAK,
        ];
        let board = run(board(
            Config {
                accelerator: Some(AcceleratorConfig { latency: 4 }),
                ..Config::default()
            },
            &program,
        ));

        let hart = &board.harts()[0];
        assert_eq!(42, hart.registers().x(Specifier::A0));
        assert_eq!(840, hart.registers().x(Specifier::A3));
        assert_eq!(2, board.accelerators()[0].processed());
        assert_eq!(2, hart.offload_channel().completed());
        assert!(hart.counters().stalled() >= 2 * 4);
        assert!(!board.accelerators()[0].is_busy());
    }

    #[test]
    fn accelerator_error_traps() {
        let raw = asm::offload(0x7F, Specifier::A0, Specifier::A1, Specifier::A2);
        let program = [raw, asm::NOP, asm::NOP, asm::NOP, asm::EBREAK];
        let board = run(board(
            Config {
                accelerator: Some(AcceleratorConfig::default()),
                core: crate::core::Config {
                    trap_vector: RAM_BASE + 0x10,
                    ..crate::core::Config::default()
                },
                ..Config::default()
            },
            &program,
        ));

        let hart = &board.harts()[0];
        assert_eq!(Ok(2), hart.read_csr(csr::MCAUSE));
        assert_eq!(Ok(RAM_BASE), hart.read_csr(csr::MEPC));
        assert_eq!(Ok(raw), hart.read_csr(csr::MTVAL));
        assert_eq!(0, hart.registers().x(Specifier::A0));
        assert_eq!(1, hart.traps_taken());
    }

    #[test]
    fn reset_restarts_from_scratch() {
        let program = [asm::addi(Specifier::A0, Specifier::X0, 7), asm::EBREAK];
        let mut board = run(board(Config::default(), &program));
        assert_eq!(7, board.harts()[0].registers().x(Specifier::A0));

        board.reset();
        assert_eq!(0, board.now());
        assert!(!board.all_halted());
        assert_eq!(0, board.harts()[0].registers().x(Specifier::A0));
        assert_eq!(RAM_BASE, board.harts()[0].registers().pc());

        board.load_physical(RAM_BASE, &asm::program(&program));
        let board = run(board);
        assert_eq!(7, board.harts()[0].registers().x(Specifier::A0));
    }
}
