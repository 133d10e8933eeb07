//! sysrun - run a command as a transient systemd service
//!
//! ```text
//! sysrun [--user] [--wait] [--pty|--pipe] [-p KEY=VALUE]... COMMAND [ARGS]...
//! ```
//!
//! Exits 0 once the unit is started. With --wait, --pty or --pipe it
//! follows the unit and exits with the command's status instead.

use std::path::PathBuf;

use clap::Parser;

use sysrun::{RunOptions, TerminalInfo};

#[derive(Parser)]
#[command(name = "sysrun")]
#[command(about = "Run a command as a transient systemd service")]
struct Args {
    /// Talk to the user service manager instead of the system one
    #[arg(long)]
    user: bool,

    /// Unit name; a random one is picked when omitted
    #[arg(long, short = 'u')]
    unit: Option<String>,

    /// Unit description; defaults to the command line
    #[arg(long)]
    description: Option<String>,

    /// Wait until the service stopped and exit with its status
    #[arg(long, short = 'W')]
    wait: bool,

    /// Don't wait for the start job to complete
    #[arg(long)]
    no_block: bool,

    /// Run the service connected to a pseudo-terminal
    #[arg(long, short = 't')]
    pty: bool,

    /// Pass our stdin/stdout/stderr to the service
    #[arg(long, short = 'P')]
    pipe: bool,

    /// Keep the unit active after the command exited
    #[arg(long, short = 'r')]
    remain_after_exit: bool,

    /// Service type (simple, exec, forking, oneshot, dbus, notify, idle)
    #[arg(long)]
    service_type: Option<String>,

    /// Run as this user
    #[arg(long)]
    uid: Option<String>,

    /// Run as this group
    #[arg(long)]
    gid: Option<String>,

    /// Nice level
    #[arg(long, allow_hyphen_values = true)]
    nice: Option<i32>,

    /// Working directory of the service
    #[arg(long)]
    working_directory: Option<PathBuf>,

    /// Use our current directory as the working directory
    #[arg(long, short = 'd', conflicts_with = "working_directory")]
    same_dir: bool,

    /// Unload the unit after it ran, even when it failed
    #[arg(long, short = 'G')]
    collect: bool,

    /// Set a unit property, e.g. -p MemoryMax=1G
    #[arg(long = "property", short = 'p', value_name = "NAME=VALUE")]
    properties: Vec<String>,

    /// Set an environment variable; a bare NAME copies ours
    #[arg(long, short = 'E', value_name = "NAME[=VALUE]")]
    setenv: Vec<String>,

    /// Only print errors
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Command to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl From<Args> for RunOptions {
    fn from(args: Args) -> Self {
        RunOptions {
            unit: args.unit,
            description: args.description,
            user: args.user,
            wait: args.wait,
            no_block: args.no_block,
            pty: args.pty,
            pipe: args.pipe,
            remain_after_exit: args.remain_after_exit,
            service_type: args.service_type,
            exec_user: args.uid,
            exec_group: args.gid,
            nice: args.nice,
            working_directory: args.working_directory,
            same_dir: args.same_dir,
            collect: args.collect,
            properties: args.properties,
            setenv: args.setenv,
            command: args.command,
            quiet: args.quiet,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    let default_level = if args.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let config = match RunOptions::from(args).into_config(TerminalInfo::detect()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("sysrun: {}", e);
            std::process::exit(1);
        }
    };

    match sysrun::commands::run(&config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("sysrun: {}", e);
            std::process::exit(1);
        }
    }
}
