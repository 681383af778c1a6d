//! Pieces shared by the command-line tools

use clap::CommandFactory;
use tracing_subscriber::EnvFilter;

use crate::error::{PlctlError, Result};

/// Exit status for usage errors and `--help`
pub const EXIT_USAGE: u8 = 2;

/// Route logs to stderr; `-v` raises the default level, `RUST_LOG` overrides it
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print the generated help plus examples to stderr
pub fn print_usage<C: CommandFactory>(examples: &[&str]) {
    let mut command = C::command();
    eprintln!("{}", command.render_help());
    if !examples.is_empty() {
        eprintln!("Examples:");
        for example in examples {
            eprintln!("  {example}");
        }
    }
}

/// Parse a 64-bit hex value, with or without a `0x` prefix
pub fn parse_hex_u64(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 16 {
        return Err(PlctlError::ParseError(format!("bad HEX64 '{text}'")));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| PlctlError::ParseError(format!("bad HEX64 '{text}': {e}")))
}

/// Parse a raw power field value given in decimal or `0x` hex
///
/// Anything wider than 16 bits is a parse error; the [1, 0x7FFF] range is
/// checked later by the codec.
pub fn parse_units(text: &str) -> Result<u16> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => trimmed.parse::<u16>(),
    };

    parsed.map_err(|_| PlctlError::ParseError(format!("invalid units '{text}' (use decimal or 0x hex)")))
}

/// Parse a register offset inside the MCHBAR window (hex, `0x` optional)
pub fn parse_offset(text: &str) -> Result<usize> {
    let value = parse_hex_u64(text)?;
    let offset = usize::try_from(value)
        .map_err(|_| PlctlError::ParseError(format!("offset '{text}' too large")))?;
    if offset % 8 != 0 {
        return Err(PlctlError::ParseError(format!(
            "offset '{text}' is not 8-byte aligned"
        )));
    }
    Ok(offset)
}

/// Parse a watt value; sign and range are checked by the codec
pub fn parse_watts(text: &str) -> Result<f64> {
    let watts: f64 = text
        .trim()
        .parse()
        .map_err(|_| PlctlError::ParseError(format!("invalid watts '{text}'")))?;
    if !watts.is_finite() {
        return Err(PlctlError::ParseError(format!("invalid watts '{text}'")));
    }
    Ok(watts)
}
