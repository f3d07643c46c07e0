use clap::Parser;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use log::{debug, error, info};
use std::fs::File;
use std::io::{Read, Write};
use std::process::ExitCode;
use tempo_core::board::{Board, Config};
use tempo_core::registers::Specifier;
use tempo_core::resources::accelerator::AcceleratorConfig;
use tempo_core::resources::clint::ClintConfig;
use tempo_core::simulator::{RunExit, Simulator};
use tempo_core::{ConfigError, ProtocolViolation};
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Elf file to run. Every hart starts at its entry point.
    elf: String,
    /// Number of harts.
    #[arg(long, default_value_t = 1)]
    harts: usize,
    /// RAM size in bytes, mapped at 0x80000000.
    #[arg(long, default_value_t = 0x0100_0000)]
    ram_size: usize,
    /// Ticks between issuing a RAM access and its completion.
    #[arg(long, default_value_t = 0)]
    memory_latency: u64,
    /// Attach an accelerator with this latency to every hart.
    #[arg(long)]
    accelerator_latency: Option<u64>,
    /// Board ticks per CLINT `resolution` period.
    #[arg(long, default_value_t = 1)]
    tick_period: u64,
    /// `mtime` advances by `tick_period / resolution` per board tick.
    #[arg(long, default_value_t = 1)]
    resolution: u64,
    /// Give up after this many ticks.
    #[arg(long, default_value_t = 100_000_000)]
    max_ticks: u64,
    /// Signature file to output signature to.
    #[arg(long, short)]
    signature: Option<String>,
    /// Increase logging verbosity (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse elf file: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error("invalid board configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("simulation aborted: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("missing symbol `{0}`")]
    MissingSymbol(&'static str),
    #[error("invalid signature range {start:#010x}..{end:#010x}")]
    SignatureRange { start: u32, end: u32 },
    #[error("not every hart halted within {0} ticks")]
    TickLimit(u64),
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = stderrlog::new()
        .verbosity(args.verbose as usize + 1)
        .modules([module_path!(), "tempo_core"])
        .init()
    {
        eprintln!("failed to set up logging: {err}");
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Error> {
    let mut buf = Vec::new();
    File::open(&args.elf)?.read_to_end(&mut buf)?;
    let elf = Elf::parse(&buf)?;

    let config = Config {
        harts: args.harts,
        ram_size: args.ram_size,
        memory_latency: args.memory_latency,
        clint: ClintConfig {
            tick_period: args.tick_period,
            resolution: args.resolution,
        },
        accelerator: args
            .accelerator_latency
            .map(|latency| AcceleratorConfig { latency }),
        core: tempo_core::core::Config {
            reset_vector: elf.entry as u32,
            ..tempo_core::core::Config::default()
        },
        ..Config::default()
    };
    let mut board = Board::new(config)?;

    for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
        debug!(
            "Loading segment into memory at [{:#010x}..{:#010x}]",
            header.p_paddr,
            header.p_paddr + header.p_filesz
        );
        board.load_physical(header.p_paddr as u32, &buf[header.file_range()]);
    }

    let mut simulator = Simulator::new(board);
    let exit = simulator.run(args.max_ticks, Board::all_halted)?;
    info!("Simulated {} ticks", simulator.ticks());

    let board = simulator.inspect();
    print_statistics(board);
    if exit == RunExit::LimitReached {
        return Err(Error::TickLimit(args.max_ticks));
    }

    if let Some(path) = args.signature {
        write_signature(board, &elf, &path)?;
    }
    Ok(())
}

fn print_statistics(board: &Board) {
    for hart in board.harts() {
        let counters = hart.counters();
        println!(
            "hart {}: {} cycles, {} retired, {} stalled, {} busy, {} traps, a0 = {:#010x}",
            hart.id(),
            counters.cycles(),
            counters.instret(),
            counters.stalled(),
            counters.busy(),
            hart.traps_taken(),
            hart.registers().x(Specifier::A0),
        );

        let handles = hart.handles();
        let dispatches: u64 = handles.iter().map(|handle| handle.executions()).sum();
        let stalling = handles.iter().filter(|handle| handle.has_stalled()).count();
        println!(
            "hart {}: {} dispatches of {} distinct instructions, {} of which stalled",
            hart.id(),
            dispatches,
            handles.len(),
            stalling,
        );
    }
}

fn symbol(elf: &Elf, wanted: &'static str) -> Result<u32, Error> {
    elf.syms
        .iter()
        .find(|sym| elf.strtab.get_at(sym.st_name) == Some(wanted))
        .map(|sym| sym.st_value as u32)
        .ok_or(Error::MissingSymbol(wanted))
}

/// Dump the words between `begin_signature` and `end_signature`, one hex word per line.
fn write_signature(board: &Board, elf: &Elf, path: &str) -> Result<(), Error> {
    let start = symbol(elf, "begin_signature")?;
    let end = symbol(elf, "end_signature")?;
    if start % 16 != 0 || end % 4 != 0 || start > end {
        return Err(Error::SignatureRange { start, end });
    }

    let mut file = File::create(path)?;
    for address in (start..end).step_by(4) {
        let mut word = [0u8; 4];
        board.read_physical(address, &mut word);
        writeln!(file, "{:08x}", u32::from_le_bytes(word))?;
    }
    Ok(())
}
