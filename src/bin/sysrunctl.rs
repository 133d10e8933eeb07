//! sysrunctl - inspect and control units started by sysrun

use clap::{Parser, Subcommand};

use sysrun::commands;
use sysrun::{BusScope, WaitConfig};

#[derive(Parser)]
#[command(name = "sysrunctl")]
#[command(about = "Wait for, signal and list transient units")]
struct Args {
    /// Talk to the user service manager instead of the system one
    #[arg(long, global = true)]
    user: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for a unit to finish and exit with its status
    Wait {
        /// Unit name (e.g. "run-u42" or "run-u42.service")
        unit: String,
    },

    /// Send a signal to all processes of an active unit
    Kill {
        /// Unit name
        unit: String,
        /// Signal name or number
        #[arg(long, short = 's', default_value = "TERM")]
        signal: String,
    },

    /// List units matching the given patterns (default "run-*")
    List {
        patterns: Vec<String>,
    },
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("sysrunctl: {}", e);
    std::process::exit(1);
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let args = Args::parse();
    let scope = if args.user {
        BusScope::User
    } else {
        BusScope::System
    };

    match args.command {
        Command::Wait { unit } => {
            let config = WaitConfig::new(&unit, args.user).unwrap_or_else(|e| fail(e));
            match commands::wait(&config).await {
                Ok(code) => std::process::exit(code),
                Err(e) => fail(e),
            }
        }
        Command::Kill { unit, signal } => {
            let signal = commands::parse_signal(&signal).unwrap_or_else(|e| fail(e));
            let unit = sysrun::units::mangle_unit_name(&unit, ".service").unwrap_or_else(|e| fail(e));
            match commands::kill(&unit, signal, scope).await {
                Ok(true) => {}
                // nothing to signal
                Ok(false) => std::process::exit(1),
                Err(e) => fail(e),
            }
        }
        Command::List { patterns } => match commands::list(&patterns, scope).await {
            Ok(units) => {
                if units.is_empty() {
                    println!("No units found");
                    return;
                }
                println!(
                    "{:<40} {:>10} {:>12} {:>10}  {}",
                    "UNIT", "LOAD", "ACTIVE", "SUB", "DESCRIPTION"
                );
                for unit in units {
                    println!(
                        "{:<40} {:>10} {:>12} {:>10}  {}",
                        unit.name, unit.load_state, unit.active_state, unit.sub_state, unit.description
                    );
                }
            }
            Err(e) => fail(e),
        },
    }
}
