use std::ffi::OsString;
use std::process::ExitCode;

use clap::Parser;

use plctl::cli::{self, init_logging, print_usage};
use plctl::common::{Access, MmioWindow, MsrHandle};
use plctl::context::{discover_base, read_power_unit};
use plctl::tools::scanner::{scan, MatchMode, ScanTarget, DEFAULT_PL1_WATTS, DEFAULT_PL2_WATTS};
use plctl::{Context, HostConfig, Result};
use plctl_raw::PowerUnit;

const EXAMPLES: &[&str] = &[
    "sudo mchbar-scan --pl1 45 --pl2 65",
    "sudo mchbar-scan --units 0x168 0x208 --any",
];

#[derive(Parser, Debug)]
#[command(name = "mchbar-scan")]
#[command(about = "Search the MCHBAR window for a register holding the given PL1/PL2")]
#[command(after_help = "Defaults: PL1=55W PL2=157W, converted using MSR_RAPL_POWER_UNIT (0x606)")]
#[command(disable_help_flag = true)]
struct Args {
    #[arg(long, value_name = "WATTS", value_parser = parse_watts, help = "PL1 to look for (default 55)")]
    pl1: Option<f64>,

    #[arg(long, value_name = "WATTS", value_parser = parse_watts, help = "PL2 to look for (default 157)")]
    pl2: Option<f64>,

    #[arg(
        long,
        num_args = 2,
        value_names = ["PL1_UNITS", "PL2_UNITS"],
        value_parser = parse_units,
        conflicts_with_all = ["pl1", "pl2"],
        help = "Raw field values to look for (decimal or 0x hex)"
    )]
    units: Option<Vec<u16>>,

    #[arg(long, help = "Ignore the enable bits (15 and 47) when matching")]
    any: bool,

    #[arg(short, long, help = "Enable verbose logging (shows every register access)")]
    verbose: bool,

    #[arg(long, help = "Print usage and exit")]
    help: bool,
}

fn parse_watts(text: &str) -> std::result::Result<f64, String> {
    cli::parse_watts(text).map_err(|e| e.to_string())
}

fn parse_units(text: &str) -> std::result::Result<u16, String> {
    cli::parse_units(text).map_err(|e| e.to_string())
}

/// Parse `argv`; on `--help` or a malformed argument the exit status is returned
fn parse_command<I, T>(argv: I) -> std::result::Result<Args, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::try_parse_from(argv).map_err(|e| {
        let _ = e.print();
        cli::EXIT_USAGE
    })?;

    if args.help {
        print_usage::<Args>(EXAMPLES);
        return Err(cli::EXIT_USAGE);
    }
    Ok(args)
}

fn match_mode(args: &Args) -> MatchMode {
    if args.any {
        MatchMode::Any
    } else {
        MatchMode::RequireEnable
    }
}

fn hardware_unit(config: &HostConfig) -> Result<PowerUnit> {
    let msr = MsrHandle::open(config, Access::ReadOnly)?;
    read_power_unit(&msr)
}

/// The power unit for this run; raw `--units` work without MSR access
fn scan_unit(args: &Args, config: &HostConfig) -> Result<PowerUnit> {
    match args.units {
        Some(_) => Ok(hardware_unit(config).unwrap_or_else(|e| {
            tracing::debug!("RAPL power unit unavailable, not needed for raw units: {e}");
            PowerUnit::FIXED_EIGHTH_WATT
        })),
        None => hardware_unit(config),
    }
}

/// Target fields and the description printed in the scan header
fn scan_target(args: &Args, unit: &PowerUnit) -> Result<(ScanTarget, String)> {
    match &args.units {
        Some(units) => {
            let target = ScanTarget::from_units(units[0], units[1])?;
            let description = format!("units PL1=0x{:X} PL2=0x{:X}", units[0], units[1]);
            Ok((target, description))
        }
        None => {
            let pl1_watts = args.pl1.unwrap_or(DEFAULT_PL1_WATTS);
            let pl2_watts = args.pl2.unwrap_or(DEFAULT_PL2_WATTS);

            let target = ScanTarget::from_watts(pl1_watts, pl2_watts, unit)?;
            let description = format!(
                "PL1={:.3}W PL2={:.3}W (units 0x{:X}/0x{:X}, unit={:.6}W)",
                pl1_watts,
                pl2_watts,
                target.pl1.get(),
                target.pl2.get(),
                unit.unit_watts()
            );
            Ok((target, description))
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = HostConfig::from_env();
    let mode = match_mode(args);

    let unit = scan_unit(args, &config)?;
    let (target, description) = scan_target(args, &unit)?;

    let ctx = Context::new(discover_base(&config)?, unit);
    let window = MmioWindow::open(&config, ctx.base.address, Access::ReadOnly)?;

    println!(
        "Scanning MCHBAR @ 0x{:016x} for {} (require_enable={})",
        ctx.base.address,
        description,
        u8::from(mode.requires_enable())
    );

    let found = scan(&window, &target, mode)?;
    for hit in &found {
        println!(
            "match off=0x{:05X} val=0x{:016x} lo=0x{:08X} hi=0x{:08X}",
            hit.offset,
            hit.value,
            hit.low(),
            hit.high()
        );
    }
    if found.is_empty() {
        println!("No matches found.");
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = match parse_command(std::env::args_os()) {
        Ok(args) => args,
        Err(code) => return ExitCode::from(code),
    };
    init_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mchbar-scan: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plctl::PlctlError;

    #[test]
    fn test_usage_paths_exit_2() {
        for argv in [
            &["p", "--help"][..],
            &["p", "--units", "1"][..],
            &["p", "--units", "1", "2", "--pl1", "3"][..],
            &["p", "--units", "1", "2", "--pl2", "3"][..],
            &["p", "--units", "0x8000x", "2"][..],
            &["p", "--pl1", "hot"][..],
            &["p", "--bogus"][..],
        ] {
            assert_eq!(
                parse_command(argv).err(),
                Some(cli::EXIT_USAGE),
                "argv {argv:?}"
            );
        }
    }

    #[test]
    fn test_defaults() {
        let args = parse_command(["p"]).unwrap();
        assert_eq!(match_mode(&args), MatchMode::RequireEnable);

        let (target, description) = scan_target(&args, &PowerUnit::FIXED_EIGHTH_WATT).unwrap();
        assert_eq!((target.pl1.get(), target.pl2.get()), (440, 1256));
        assert_eq!(
            description,
            "PL1=55.000W PL2=157.000W (units 0x1B8/0x4E8, unit=0.125000W)"
        );
    }

    #[test]
    fn test_raw_units_and_relaxed_match() {
        let args = parse_command(["p", "--units", "0x168", "520", "--any"]).unwrap();
        assert_eq!(args.units, Some(vec![0x168, 520]));
        assert_eq!(match_mode(&args), MatchMode::Any);

        let (target, description) = scan_target(&args, &PowerUnit::FIXED_EIGHTH_WATT).unwrap();
        assert_eq!((target.pl1.get(), target.pl2.get()), (0x168, 0x208));
        assert_eq!(description, "units PL1=0x168 PL2=0x208");
    }

    #[test]
    fn test_zero_units_are_a_runtime_error() {
        let args = parse_command(["p", "--units", "0", "1"]).unwrap();
        let err = scan_target(&args, &PowerUnit::FIXED_EIGHTH_WATT).unwrap_err();
        assert!(matches!(err, PlctlError::Range(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
