use std::ffi::OsString;
use std::process::ExitCode;

use clap::Parser;

use plctl::cli::{self, init_logging, print_usage};
use plctl::common::{Access, MmioWindow, MsrHandle};
use plctl::context::{discover_base, read_power_unit};
use plctl::tools::oneshot::{self, resolve_unit, Mode};
use plctl::{Context, HostConfig, MmioPowerLimit, PowerLimitAccess, Result};
use plctl_raw::PowerUnit;

const EXAMPLES: &[&str] = &[
    "sudo mchbar-pl-write --set 150 170",
    "sudo mchbar-pl-write --restore 0x004284e800df81b8",
];

#[derive(Parser, Debug)]
#[command(name = "mchbar-pl-write")]
#[command(about = "Set or restore the MCHBAR copy of the package power limit")]
#[command(disable_help_flag = true)]
struct Args {
    #[arg(
        long,
        num_args = 2,
        value_names = ["PL1_W", "PL2_W"],
        allow_negative_numbers = true,
        conflicts_with = "restore",
        help = "Set PL1/PL2 in watts (0 < W <= 500)"
    )]
    set: Option<Vec<f64>>,

    #[arg(
        long,
        value_name = "HEX64",
        value_parser = parse_hex,
        help = "Write a previously printed raw value back"
    )]
    restore: Option<u64>,

    #[arg(
        long,
        help = "Deprecated: assume 1/8 W units instead of reading MSR 0x606"
    )]
    fixed_scale: bool,

    #[arg(
        long,
        value_parser = parse_offset,
        help = "MCHBAR offset of the power-limit register (hex, default 0x59A0)"
    )]
    offset: Option<usize>,

    #[arg(short, long, help = "Enable verbose logging (shows every register access)")]
    verbose: bool,

    #[arg(long, help = "Print usage and exit")]
    help: bool,
}

fn parse_hex(text: &str) -> std::result::Result<u64, String> {
    cli::parse_hex_u64(text).map_err(|e| e.to_string())
}

fn parse_offset(text: &str) -> std::result::Result<usize, String> {
    cli::parse_offset(text).map_err(|e| e.to_string())
}

impl Args {
    fn mode(&self) -> Option<Mode> {
        match (&self.set, self.restore) {
            (Some(watts), None) => Some(Mode::Set {
                pl1_watts: watts[0],
                pl2_watts: watts[1],
            }),
            (None, Some(value)) => Some(Mode::Restore(value)),
            _ => None,
        }
    }
}

/// Parse `argv` into arguments and a mode
///
/// On `--help`, a missing mode or a malformed argument, usage has already been
/// printed to stderr and the exit status is returned instead.
fn parse_command<I, T>(argv: I) -> std::result::Result<(Args, Mode), u8>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::try_parse_from(argv).map_err(|e| {
        let _ = e.print();
        cli::EXIT_USAGE
    })?;

    match args.mode() {
        Some(mode) if !args.help => Ok((args, mode)),
        _ => {
            print_usage::<Args>(EXAMPLES);
            Err(cli::EXIT_USAGE)
        }
    }
}

fn hardware_unit(config: &HostConfig) -> Result<PowerUnit> {
    let msr = MsrHandle::open(config, Access::ReadOnly)?;
    read_power_unit(&msr)
}

fn run(args: &Args, mode: Mode) -> Result<()> {
    let mut config = HostConfig::from_env();
    if let Some(offset) = args.offset {
        config.pl_offset = offset;
    }

    let unit = match mode {
        Mode::Set { .. } => resolve_unit(hardware_unit(&config), args.fixed_scale),
        // A raw restore needs no unit conversion
        Mode::Restore(_) => PowerUnit::FIXED_EIGHTH_WATT,
    };

    let ctx = Context::new(discover_base(&config)?, unit);
    let window = MmioWindow::open(&config, ctx.base.address, Access::ReadWrite)?;
    let mmio = MmioPowerLimit::new(&window, config.pl_offset);
    tracing::debug!("Target register {}", mmio.location());

    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "mchbar-pl-write".to_string());

    let mut stdout = std::io::stdout();
    oneshot::run(&mmio, &mode, &ctx.unit, &program, &mut stdout)?;
    Ok(())
}

fn main() -> ExitCode {
    let (args, mode) = match parse_command(std::env::args_os()) {
        Ok(parsed) => parsed,
        Err(code) => return ExitCode::from(code),
    };
    init_logging(args.verbose);

    match run(&args, mode) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mchbar-pl-write: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
