use std::env;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;

use clap::{ArgAction, Args, Parser, Subcommand};
use retrace_core::symbols::{clean_name, load_elf_symbols};
use retrace_core::types::{Address, Trace, TraceStatus};
use retrace_core::{ProcessSnapshot, RetraceError, RetraceResult, UnwindLimits};
use retrace_utils::{info, init_logging, LogLevel, LoggingConfig};

/// Recover call stacks from captured process state without unwind tables.
#[derive(Parser, Debug)]
#[command(name = "retrace")]
#[command(version)]
#[command(about = "Recover call stacks from captured process state without unwind tables", long_about = None)]
struct Cli
{
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Unwind the thread captured in a JSON process snapshot
    Unwind(UnwindArgs),
    /// List the function and relocation symbols of an ELF image
    Symbols
    {
        /// Path to the ELF file
        image: PathBuf,
        /// Address the image is loaded at (hex format: 0x1000 or decimal)
        #[arg(long, default_value = "0")]
        load_bias: Address,
        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct UnwindArgs
{
    /// Path to the snapshot JSON file
    snapshot: PathBuf,
    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<usize>,
    /// Stop after scanning this many bytes of stack
    #[arg(long)]
    max_bytes: Option<u64>,
    /// Highest stack address (hex format: 0x7ffe0000 or decimal)
    #[arg(long)]
    stack_base: Option<Address>,
    /// Keep consecutive frames from direct recursion
    #[arg(long, default_value_t = false)]
    preserve_recursion: bool,
    /// Drop frames whose callee name equals the previous frame's
    #[arg(long, default_value_t = false)]
    collapse_callees: bool,
    /// Keep the main-program / C-library flags across gap recovery
    #[arg(long, default_value_t = false)]
    keep_ratchets: bool,
    /// Extra symbols from an ELF image, as PATH or PATH@LOAD_BIAS (repeatable)
    #[arg(long = "symbols", value_name = "PATH[@BIAS]")]
    symbols: Vec<SymbolSpec>,
    /// Print the trace as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl UnwindArgs
{
    /// Apply command-line overrides on top of the snapshot's own limits.
    fn limits(&self, mut limits: UnwindLimits) -> UnwindLimits
    {
        if self.max_frames.is_some() {
            limits.max_frames = self.max_frames;
        }
        if self.max_bytes.is_some() {
            limits.max_bytes = self.max_bytes;
        }
        if self.stack_base.is_some() {
            limits.stack_base = self.stack_base;
        }
        limits.preserve_recursion |= self.preserve_recursion;
        limits.collapse_recursive_callees |= self.collapse_callees;
        if self.keep_ratchets {
            limits.reset_ratchets_on_recovery = false;
        }
        limits
    }
}

/// An ELF image and the address it is loaded at.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SymbolSpec
{
    path: PathBuf,
    load_bias: Address,
}

impl FromStr for SymbolSpec
{
    type Err = RetraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let (path, load_bias) = match s.rsplit_once('@') {
            Some((path, bias)) => (path, bias.parse::<Address>().map_err(RetraceError::InvalidArgument)?),
            None => (s, Address::ZERO),
        };
        if path.is_empty() {
            return Err(RetraceError::InvalidArgument(format!("symbol spec {s:?} has no path")));
        }
        Ok(Self {
            path: PathBuf::from(path),
            load_bias,
        })
    }
}

fn main()
{
    let cli = Cli::parse();

    // -v flags win; otherwise RUST_LOG, otherwise warnings only.
    let mut config = match LoggingConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };
    if cli.verbose > 0 || env::var_os("RUST_LOG").is_none() {
        config = config.with_level(LogLevel::from_verbosity(cli.verbose));
    }
    let _guard = match init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Commands) -> RetraceResult<()>
{
    match command {
        Commands::Unwind(args) => {
            let mut snapshot = ProcessSnapshot::load(&args.snapshot)?;
            for spec in &args.symbols {
                let table = load_elf_symbols(&spec.path, spec.load_bias.value())?;
                snapshot.overlay_symbols(table);
            }

            let limits = args.limits(snapshot.effective_limits());
            let trace = snapshot.unwind_with(&limits);
            info!(frames = trace.len(), iterations = trace.stats.iterations, "unwind finished");

            if args.json {
                println!("{}", trace.to_json()?);
            } else {
                print_trace(&snapshot, &trace);
            }
            Ok(())
        }
        Commands::Symbols { image, load_bias, json } => {
            let table = load_elf_symbols(&image, load_bias.value())?;
            if json {
                let listing = serde_json::json!({
                    "functions": table.functions(),
                    "relocations": table.relocations().collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for function in table.functions() {
                    println!("{} {:>8} {}", function.start, function.size, clean_name(&function.name));
                }
                for relocation in table.relocations() {
                    println!("{} {:>8} {}@got", relocation.address, "-", relocation.name);
                }
            }
            Ok(())
        }
    }
}

fn print_trace(snapshot: &ProcessSnapshot, trace: &Trace)
{
    println!(
        "Thread {} ({}): pc={} sp={}",
        snapshot.thread, snapshot.architecture, snapshot.registers.pc, snapshot.registers.sp
    );
    for line in trace.report_lines() {
        println!("{line}");
    }
    match &trace.status {
        TraceStatus::Complete => println!("-- {} frames, complete", trace.len()),
        TraceStatus::Incomplete { reason } => println!("-- {} frames, incomplete: {reason}", trace.len()),
        TraceStatus::Unsupported { reason } => println!("-- not unwound: {reason}"),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_symbol_spec_with_bias()
    {
        let spec: SymbolSpec = "/lib/libc.so.6@0x7f0000000000".parse().unwrap();
        assert_eq!(spec.path, PathBuf::from("/lib/libc.so.6"));
        assert_eq!(spec.load_bias, Address::new(0x7f00_0000_0000));
    }

    #[test]
    fn test_symbol_spec_without_bias()
    {
        let spec: SymbolSpec = "./app".parse().unwrap();
        assert_eq!(spec.load_bias, Address::ZERO);
        assert!("@0x1000".parse::<SymbolSpec>().is_err());
        assert!("app@nowhere".parse::<SymbolSpec>().is_err());
    }

    #[test]
    fn test_flags_override_snapshot_limits()
    {
        let cli = Cli::parse_from([
            "retrace",
            "unwind",
            "core.json",
            "--max-frames",
            "8",
            "--stack-base",
            "0x7ffe1000",
            "--keep-ratchets",
            "--symbols",
            "app@0x400000",
        ]);
        let Commands::Unwind(args) = cli.command else {
            panic!("expected unwind");
        };

        let base = UnwindLimits::default().with_max_bytes(64);
        let limits = args.limits(base);
        assert_eq!(limits.max_frames, Some(8));
        assert_eq!(limits.max_bytes, Some(64));
        assert_eq!(limits.stack_base, Some(Address::new(0x7ffe_1000)));
        assert!(!limits.reset_ratchets_on_recovery);
        assert_eq!(args.symbols.len(), 1);
    }

    #[test]
    fn test_verbosity_is_global()
    {
        let cli = Cli::parse_from(["retrace", "symbols", "/bin/true", "-vv"]);
        assert_eq!(cli.verbose, 2);
    }
}
