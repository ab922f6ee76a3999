use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing::error;

use cfgconv::cli::{build_address_filter, Cli, ReaderKind, StatusFilter};
use cfgconv::core::{CfgStatus, CfgTable, InstructionRegistry};
use cfgconv::logging::init_tracing;
use cfgconv::readers::{BFTraceReader, CfgGrindReader, DcfgReader};
use cfgconv::render::{render_dot, render_text};

fn run(cli: &Cli) -> Result<()> {
    let mut instructions = InstructionRegistry::new();
    if let Some(path) = &cli.instrs_file {
        let file = fs::File::open(path)
            .with_context(|| format!("opening instruction metadata file {}", path.display()))?;
        instructions
            .load(std::io::BufReader::new(file))
            .with_context(|| format!("parsing instruction metadata file {}", path.display()))?;
    }

    let input = fs::read_to_string(&cli.input)
        .with_context(|| format!("reading input file {}", cli.input.display()))?;

    let mut table = CfgTable::new();
    match cli.reader {
        ReaderKind::Bftrace => {
            let reader = BFTraceReader::new(&input).context("parsing bftrace input")?;
            reader.load_cfgs(&mut table).context("loading bftrace CFGs")?;
        }
        ReaderKind::Cfggrind => {
            let reader = CfgGrindReader::new(&input).context("parsing cfggrind input")?;
            reader
                .load_cfgs(&mut table, &mut instructions)
                .context("loading cfggrind CFGs")?;
        }
        ReaderKind::Dcfg => {
            let reader = DcfgReader::new(&input).context("parsing DCFG input")?;
            reader.load_cfgs(&mut table).context("loading DCFG CFGs")?;
        }
    }

    let filter = build_address_filter(cli)?;

    if let Some(dir) = &cli.dump_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating dump directory {}", dir.display()))?;
    }

    for cfg in table.cfgs() {
        if !filter.admits(cfg.addr()) {
            continue;
        }
        let matches_status = match cli.status {
            StatusFilter::All => true,
            StatusFilter::Valid => cfg.status() == CfgStatus::Valid,
            StatusFilter::Invalid => cfg.status() == CfgStatus::Invalid,
        };
        if !matches_status {
            continue;
        }

        print!("{}", render_text(cfg));

        if let Some(dir) = &cli.dump_dir {
            let path = dir.join(format!("cfg-{}.dot", cfg.addr()));
            fs::write(&path, render_dot(cfg))
                .with_context(|| format!("writing dot dump {}", path.display()))?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    init_tracing();

    // `Cli::parse()` exits with clap's default code 2 on a usage error;
    // spec.md §6 requires exit code 1 for a usage error, the same code
    // used for I/O and format failures. `try_parse` lets us print clap's
    // own diagnostic to the stream it chooses (`--help`/`--version` still
    // go to stdout and exit 0) and map everything else onto exit code 1.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "cfgconv failed");
            eprintln!("cfgconv: {err:#}");
            ExitCode::FAILURE
        }
    }
}
