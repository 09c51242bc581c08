//! corepin binary
//!
//! Invoked as `corepin <binary> [args...]`, or through a shim named after a
//! package manager binary (`yarn`, `pnpx`, ...), in which case `argv[0]`
//! picks the binary.

use clap::Parser;
use corepin::{Broker, BrokerError, Config, HttpTransport};
use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter
const LOG_ENV: &str = "COREPIN_LOG";

#[derive(Parser)]
#[command(name = "corepin")]
#[command(about = "Runs the package manager version your project pins", long_about = None)]
#[command(version)]
struct Cli {
    /// Package manager binary to run (npm, npx, yarn, yarnpkg, pnpm, pnpx)
    binary: String,

    /// Arguments passed through untouched
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<OsString>,
}

fn main() {
    init_tracing();

    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            report(&e);
            1
        }
    };
    std::process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn run() -> anyhow::Result<i32> {
    let mut argv: Vec<OsString> = std::env::args_os().collect();

    let invoked_as = argv
        .first()
        .and_then(|arg0| Path::new(arg0).file_stem())
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .unwrap_or_default();

    let (binary, args) = if !invoked_as.is_empty() && invoked_as != "corepin" {
        let args = argv.split_off(1.min(argv.len()));
        (invoked_as, args)
    } else if argv.len() > 1 && !argv[1].to_string_lossy().starts_with('-') {
        // Everything after the binary belongs to the package manager, flags
        // like --version included
        let mut args = argv.split_off(1);
        let binary = args.remove(0).to_string_lossy().into_owned();
        (binary, args)
    } else {
        let cli = Cli::parse_from(argv);
        (cli.binary, cli.args)
    };

    let config = Config::builtin()?;
    let broker = Broker::new(HttpTransport::new()?, config, std::env::vars());
    let cwd = std::env::current_dir()?;

    Ok(broker.run(&binary, &args, &cwd)?)
}

/// Print an error to stderr as `Usage Error:` or `Internal Error:`
fn report(error: &anyhow::Error) {
    let usage = error
        .downcast_ref::<BrokerError>()
        .is_some_and(BrokerError::is_usage);
    let label = if usage { "Usage Error" } else { "Internal Error" };

    let choice = if std::env::var_os("NO_COLOR").is_some() {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };
    let mut stderr = StandardStream::stderr(choice);

    let mut spec = ColorSpec::new();
    spec.set_fg(Some(Color::Red)).set_bold(true);
    let _ = stderr.set_color(&spec);
    let _ = write!(stderr, "{}", label);
    let _ = stderr.reset();
    let _ = writeln!(stderr, ": {:#}", error);
}
