use std::process::ExitCode;

use clap::Parser;

use plctl::cli::{self, init_logging};
use plctl::common::Access;
use plctl::context::{discover_base, read_power_unit};
use plctl::tools::interactive::{confirm_on_stdin, PendingWrite, Session, StdinPrompt};
use plctl::{Context, Devices, HostConfig, PowerLimitAccess, Result};

#[derive(Parser, Debug)]
#[command(name = "limits-ui")]
#[command(about = "Interactive view and editor for the MSR and MCHBAR package power limits")]
struct Args {
    #[arg(
        long,
        value_parser = parse_offset,
        help = "MCHBAR offset of the power-limit register (hex, default 0x59A0)"
    )]
    offset: Option<usize>,

    #[arg(short, long, help = "Enable verbose logging (shows every register access)")]
    verbose: bool,
}

fn parse_offset(text: &str) -> std::result::Result<usize, String> {
    cli::parse_offset(text).map_err(|e| e.to_string())
}

fn run(args: Args) -> Result<()> {
    let mut config = HostConfig::from_env();
    if let Some(offset) = args.offset {
        config.pl_offset = offset;
    }

    let base = discover_base(&config)?;
    let devices = Devices::open(&config, &base, Access::ReadWrite)?;
    let ctx = Context::new(base, read_power_unit(&devices.msr)?);

    let msr = devices.msr_limit();
    let mmio = devices.mmio_limit();

    println!(
        "Limits UI ({} + {})",
        msr.location(),
        mmio.location()
    );
    println!(
        "Power unit: 2^-{} W = {:.6} W\n",
        ctx.unit.power_units,
        ctx.unit_watts()
    );

    Session::new(
        &ctx.unit,
        &msr,
        &mmio,
        &devices.powercap,
        StdinPrompt,
        |pending: &PendingWrite| confirm_on_stdin(pending.question()),
        std::io::stdout(),
        std::io::stderr(),
    )
    .run()
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(cli::EXIT_USAGE);
        }
    };
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("limits-ui: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
