//! nash CLI entry point.
//!
//! Usage:
//!   nash <script> [args...]    # run a script file
//!   nash -c <command>          # execute a command string and exit

use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nash::{Obj, Shell};

#[tokio::main]
async fn main() -> ExitCode {
    // respects RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().collect();

    let shell = Shell::new_root()
        .await
        .map_err(|e| anyhow::anyhow!("shell setup failed: {}", e))?;

    let result = match args.get(1).map(|s| s.as_str()) {
        Some("--help" | "-h") | None => {
            print_help();
            return Ok(ExitCode::SUCCESS);
        }
        Some("-c") => {
            let command = args.get(2).context("-c requires a command argument")?;
            shell.exec("<argument>", command).await
        }
        Some(path) => shell.exec_file(path).await,
    };

    let failed = result.is_err();
    if let Err(e) = result {
        eprintln!("{}", e);
    }

    let status = match shell.get_var("status") {
        Some(Obj::Str(s)) => s.parse::<u8>().ok(),
        _ => None,
    };
    match status {
        Some(code) if code != 0 || !failed => Ok(ExitCode::from(code)),
        _ if failed => Ok(ExitCode::FAILURE),
        _ => Ok(ExitCode::SUCCESS),
    }
}

fn print_help() {
    println!("nash - shell scripting language interpreter");
    println!();
    println!("Usage:");
    println!("  nash <script> [args...]   run a script file");
    println!("  nash -c <command>         execute a command string");
    println!();
    println!("Set RUST_LOG=debug for interpreter tracing.");
}
