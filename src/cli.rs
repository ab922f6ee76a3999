//! Command-line surface. A thin driver: it owns argument parsing, file I/O,
//! and range/address filtering so the reconstruction pipeline in `core` and
//! `readers` never has to see a `Path` or a `std::env::Args`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::core::Address;
use crate::error::{CfgConvError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReaderKind {
    Bftrace,
    Cfggrind,
    Dcfg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Valid,
    Invalid,
}

/// Converts bftrace, cfggrind, or DCFG traces into canonical CFG dumps, and
/// optionally a `.dot` file per emitted procedure.
#[derive(Debug, Parser)]
#[command(name = "cfgconv", version, about)]
pub struct Cli {
    /// Input format.
    #[arg(short = 't', long = "type", value_enum)]
    pub reader: ReaderKind,

    /// Emit only CFGs matching this validator status.
    #[arg(short = 's', long = "status", value_enum, default_value = "all")]
    pub status: StatusFilter,

    /// Restrict emission to entry addresses within `start:end` (hex, inclusive). Repeatable.
    #[arg(short = 'r', long = "range")]
    pub ranges: Vec<String>,

    /// Restrict emission to a single entry address (hex). Repeatable.
    #[arg(short = 'a', long = "addr")]
    pub addrs: Vec<String>,

    /// Read entry addresses one-per-line from this file. Repeatable.
    #[arg(short = 'A', long = "addr-file")]
    pub addr_files: Vec<PathBuf>,

    /// Instruction metadata file (`address:size:text` lines).
    #[arg(short = 'i', long = "instrs")]
    pub instrs_file: Option<PathBuf>,

    /// Directory to write one `cfg-0xADDR.dot` file per emitted CFG into.
    #[arg(short = 'd', long = "dump-dir")]
    pub dump_dir: Option<PathBuf>,

    /// Input file to parse.
    pub input: PathBuf,
}

/// A parsed `-r`/`-a`/`-A` address filter. An empty filter admits everything.
#[derive(Debug, Default)]
pub struct AddressFilter {
    ranges: Vec<(Address, Address)>,
    points: Vec<Address>,
}

impl AddressFilter {
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.points.is_empty()
    }

    pub fn admits(&self, addr: Address) -> bool {
        if self.is_empty() {
            return true;
        }
        self.points.contains(&addr)
            || self
                .ranges
                .iter()
                .any(|(start, end)| addr >= *start && addr <= *end)
    }

    pub fn add_point(&mut self, addr: Address) {
        self.points.push(addr);
    }

    pub fn add_range(&mut self, start: Address, end: Address) {
        self.ranges.push((start, end));
    }
}

fn parse_hex_addr(text: &str) -> Result<Address> {
    let trimmed = text.trim();
    let hex = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")).unwrap_or(trimmed);
    u64::from_str_radix(hex, 16)
        .map(Address::new)
        .map_err(|_| CfgConvError::InvalidFilter(format!("not a hex address: {text}")))
}

/// Builds the combined filter from `-r`, `-a` and the contents of every
/// `-A` file.
pub fn build_address_filter(cli: &Cli) -> Result<AddressFilter> {
    let mut filter = AddressFilter::default();

    for range in &cli.ranges {
        let (start, end) = range
            .split_once(':')
            .ok_or_else(|| CfgConvError::InvalidFilter(format!("range missing ':': {range}")))?;
        filter.add_range(parse_hex_addr(start)?, parse_hex_addr(end)?);
    }

    for addr in &cli.addrs {
        filter.add_point(parse_hex_addr(addr)?);
    }

    for path in &cli.addr_files {
        let text = std::fs::read_to_string(path)?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            filter.add_point(parse_hex_addr(line)?);
        }
    }

    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_filter_admits_everything_when_empty() {
        let filter = AddressFilter::default();
        assert!(filter.admits(Address(0x400)));
    }

    #[test]
    fn test_address_filter_range_and_point() {
        let mut filter = AddressFilter::default();
        filter.add_range(Address(0x100), Address(0x200));
        filter.add_point(Address(0x900));

        assert!(filter.admits(Address(0x150)));
        assert!(filter.admits(Address(0x900)));
        assert!(!filter.admits(Address(0x300)));
    }

    #[test]
    fn test_parse_hex_addr_accepts_with_and_without_prefix() {
        assert_eq!(parse_hex_addr("0x400").unwrap(), Address(0x400));
        assert_eq!(parse_hex_addr("400").unwrap(), Address(0x400));
        assert!(parse_hex_addr("not-hex").is_err());
    }
}
