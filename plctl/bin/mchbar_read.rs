use std::process::ExitCode;

use clap::Parser;

use plctl::cli::{self, init_logging};
use plctl::common::{Access, MmioWindow, MsrHandle};
use plctl::context::{discover_base, read_power_unit};
use plctl::tools::dump::dump;
use plctl::{HostConfig, Result};

#[derive(Parser, Debug)]
#[command(name = "mchbar-read")]
#[command(about = "Print the commonly located MCHBAR package registers (read-only)")]
struct Args {
    #[arg(long, help = "Decode limits and energy using MSR 0x606")]
    decode: bool,

    #[arg(short, long, help = "Enable verbose logging (shows every register access)")]
    verbose: bool,
}

fn run(args: &Args) -> Result<()> {
    let config = HostConfig::from_env();

    let unit = if args.decode {
        let msr = MsrHandle::open(&config, Access::ReadOnly)?;
        Some(read_power_unit(&msr)?)
    } else {
        None
    };

    let base = discover_base(&config)?;
    let window = MmioWindow::open(&config, base.address, Access::ReadOnly)?;

    let mut stdout = std::io::stdout();
    dump(&window, unit.as_ref(), &mut stdout)
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

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mchbar-read: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
