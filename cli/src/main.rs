use std::path::PathBuf;
use std::process::exit;

use anyhow::Context as AnyhowContext;
use clap::error::ErrorKind;
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};

use exposcan::axml::ExecAxmlDecoder;
use exposcan::{classify_models, report, scan, Config, Scanner};

/// Audit a firmware package dump for exported components whose guarding
/// permissions are undefined or under-privileged
#[derive(Parser)]
#[command(name = "exposcan")]
#[command(version)]
struct Cli {
    /// Directory holding the dump: per-package subdirectories of APKs,
    /// loose APKs, or a mix of both
    root: PathBuf,
}

fn configure_logger() -> anyhow::Result<LoggerHandle> {
    // Verbosity is env driven (RUST_LOG style) since the command line is
    // just the scan root
    let logger = Logger::try_with_env_or_str("info").with_context(|| "creating logger")?;
    Ok(logger.start().with_context(|| "starting logger")?)
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let root = cli.root.as_path();

    let config = Config::load(root)?;

    let models = match scan::load_cache(root)? {
        Some(models) => models,
        None => {
            // Only a fresh scan needs the decoder; re-analyzing cached
            // results works without one installed
            let decoder = match &config.axml_command {
                Some(cmd) => ExecAxmlDecoder::new(cmd),
                None => ExecAxmlDecoder::default_decoder(),
            }?;
            let scanner = Scanner::new(&decoder);
            scan::load_or_scan(root, &scanner)?
        }
    };

    println!(
        "analyzing component permissions in {} packages",
        models.len()
    );

    let classification = classify_models(config.privilege_rule(), &models);

    let path = report::write_report(root, &classification)?;
    println!(
        "{} undefined-permission and {} under-privileged components written to {}",
        classification.undefined.len(),
        classification.unprivileged.len(),
        path.display(),
    );

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(v) => v,
        Err(e) => {
            let _ = e.print();
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            exit(code);
        }
    };

    let log_handle = configure_logger()?;
    let res = run(&cli);
    log_handle.flush();
    res
}
