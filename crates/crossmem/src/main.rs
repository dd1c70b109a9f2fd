use std::error::Error;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use crossmem_core::classify::DEFAULT_USER_LIMIT;
use crossmem_core::error::Status;
use crossmem_core::process::{info_class, ProcessHost, Processes};
use crossmem_core::sim::{FailPoint, SimHost};
use crossmem_core::types::{AccessMask, Address, ProcessId};
use crossmem_core::CapabilityTable;
use crossmem_utils::{
    default_log_file, format_hexdump, info, init_logging_with, parse_address, parse_hex_bytes, LogConfig, LogFormat,
    LogLevel, LoggingGuard,
};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Read and write another process's memory through pinned, mapped, fault-contained transfers.
#[derive(Parser, Debug)]
#[command(name = "crossmem")]
#[command(version)]
#[command(about = "Read and write another process's memory through pinned, mapped, fault-contained transfers", long_about = None)]
struct Cli
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format: pretty or json (overrides CROSSMEM_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Also log to a file; without a path, ~/.crossmem/<date>-crossmem.log
    #[arg(long, global = true)]
    log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Read memory from a process and print a hexdump
    Read
    {
        /// Process ID (PID) to read from
        pid: u32,
        /// Address to read from (hex format: 0x1000 or decimal)
        #[arg(value_parser = parse_address)]
        address: u64,
        /// Number of bytes to read
        #[arg(short, long, default_value_t = 16)]
        length: usize,
    },
    /// Write bytes into a process
    Write
    {
        /// Process ID (PID) to write to
        pid: u32,
        /// Address to write to (hex format: 0x1000 or decimal)
        #[arg(value_parser = parse_address)]
        address: u64,
        /// Bytes as hex, e.g. "de ad be ef"
        bytes: String,
    },
    /// Suspend every thread of a process
    Suspend
    {
        /// Process ID (PID) to suspend
        pid: u32,
    },
    /// Resume a suspended process
    Resume
    {
        /// Process ID (PID) to resume
        pid: u32,
    },
    /// Show which host primitives are available, and basic process information
    Info
    {
        /// Process ID (PID) to describe
        pid: Option<u32>,
    },
    /// Run a transfer against the simulated host
    Demo,
}

fn main()
{
    let cli = Cli::parse();

    let _logging = match init_cli_logging(&cli) {
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

fn init_cli_logging(cli: &Cli) -> CliResult<LoggingGuard>
{
    let mut config = LogConfig::from_env();
    if let Some(level) = cli.log_level {
        config = config.with_level(level);
    }
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    match &cli.log_file {
        Some(Some(path)) => config = config.with_file(path),
        Some(None) => config = config.with_file(default_log_file()?),
        None => {}
    }
    Ok(init_logging_with(&config)?)
}

fn run_command(command: Commands) -> CliResult<()>
{
    match command {
        Commands::Demo => run_demo(),
        command => run_on_native_host(command),
    }
}

#[cfg(target_os = "macos")]
fn run_on_native_host(command: Commands) -> CliResult<()>
{
    let host = crossmem_core::MachHost::new();
    run_process_command(Processes::new(&host), command)
}

#[cfg(not(target_os = "macos"))]
fn run_on_native_host(command: Commands) -> CliResult<()>
{
    info!(?command, "no native host on this platform");
    Err(crossmem_core::CrossmemError::NotImplemented("process access on this platform (try `crossmem demo`)").into())
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn run_process_command<H: ProcessHost>(processes: Processes<'_, H>, command: Commands) -> CliResult<()>
{
    match command {
        Commands::Read { pid, address, length } => {
            info!("Reading {} bytes at 0x{:x} from process {}", length, address, pid);
            let mut buffer = vec![0u8; length];
            processes.read_memory(ProcessId(pid), Address::new(address), &mut buffer)?;
            print!("{}", format_hexdump(address, &buffer));
        }
        Commands::Write { pid, address, bytes } => {
            let bytes = parse_hex_bytes(&bytes)?;
            info!("Writing {} bytes at 0x{:x} to process {}", bytes.len(), address, pid);
            processes.write_memory(ProcessId(pid), Address::new(address), &bytes)?;
            println!("Wrote {} bytes to 0x{:x} in process {}", bytes.len(), address, pid);
        }
        Commands::Suspend { pid } => {
            let process = processes.process(ProcessId(pid))?;
            processes.suspend(&process)?;
            println!("Suspended process {pid}");
        }
        Commands::Resume { pid } => {
            let process = processes.process(ProcessId(pid))?;
            processes.resume(&process)?;
            println!("Resumed process {pid}");
        }
        Commands::Info { pid } => {
            print_capabilities(processes.capabilities());
            if let Some(pid) = pid {
                print_process_info(processes, ProcessId(pid))?;
            }
        }
        Commands::Demo => run_demo()?,
    }
    Ok(())
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn print_process_info<H: ProcessHost>(processes: Processes<'_, H>, pid: ProcessId) -> CliResult<()>
{
    let handle = processes.open_process(pid, AccessMask::QUERY)?;
    let mut record = [0u8; info_class::PROCESS_BASIC_LEN];
    processes.query_information_process(&handle, info_class::BASIC, &mut record)?;

    let field = |at: usize| [record[at], record[at + 1], record[at + 2], record[at + 3]];
    let exit_status = i32::from_le_bytes(field(0));
    println!("\nProcess {pid}:");
    if exit_status == info_class::STILL_ACTIVE {
        println!("  State: running");
    } else {
        println!("  State: exited ({exit_status})");
    }
    println!("  Suspend count: {}", u32::from_le_bytes(field(4)));
    println!("  Threads: {}", u32::from_le_bytes(field(12)));
    Ok(())
}

fn print_capabilities(table: &CapabilityTable)
{
    println!("Host primitives:");
    for (capability, available) in table.iter() {
        let mark = if available { "yes" } else { "no" };
        println!("  {:<26} {}", capability.name(), mark);
    }
}

fn run_demo() -> CliResult<()>
{
    let host = SimHost::new();
    let processes = Processes::new(&host);
    let pid = ProcessId(4242);
    let base = Address::new(0x40_0000);
    let target = base + 0x10;

    host.spawn_process(pid.0).add_region(base, 0x1000)?;
    println!("Simulated process {pid} with 4 KiB at {base}");

    processes.write_memory(pid, target, &[0x11; 16])?;
    let mut readback = [0u8; 16];
    processes.read_memory(pid, target, &mut readback)?;
    println!("\nWrote and read back 16 bytes at {target}:");
    print!("{}", format_hexdump(target.value(), &readback));
    println!(
        "Pins live: {}, mappings live: {}, secure calls: {}",
        host.live_pins(),
        host.live_maps(),
        host.secure_calls()
    );

    host.fail_next(FailPoint::Copy);
    let faulted = processes.read_memory(pid, target, &mut readback);
    println!("\nInjected copy fault: {:?}", Status::of(&faulted));
    if let Err(e) = faulted {
        println!("  {e}");
    }
    println!("Pins live after fault: {}", host.live_pins());

    let privileged = DEFAULT_USER_LIMIT + 1;
    let rejected = processes.read_memory(pid, privileged, &mut readback);
    println!("\nRead at privileged address {privileged}: {:?}", Status::of(&rejected));

    print_capabilities(processes.capabilities());
    Ok(())
}
