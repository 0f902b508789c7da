use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pocket_runtime::{builtin_modules, RuntimeConfig};
use tracing_subscriber::EnvFilter;

/// Pocket - host mini-programs from the command line
#[derive(Parser, Debug)]
#[command(name = "pocket")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a session file and print bridge traffic as JSON lines
    Run {
        /// Runtime configuration (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Session file (JSON)
        session: PathBuf,
    },
    /// List the APIs of the built-in modules
    Apis,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("POCKET_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

async fn run(command: Command) -> pocket_host::Result<usize> {
    match command {
        Command::Run { config, session } => {
            let config = match config {
                Some(path) => RuntimeConfig::from_json_file(path)?,
                None => RuntimeConfig::default(),
            };
            let session = pocket_host::Session::from_json_file(session)?;
            let stdout = std::io::stdout();
            pocket_host::run_session(config, session, stdout.lock()).await
        }
        Command::Apis => {
            for module in builtin_modules() {
                for (name, entry) in &module.apis {
                    println!("{}.{} ({:?})", module.name, name, entry.dispatch);
                }
            }
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();

    match run(args.command).await {
        Ok(0) => {}
        Ok(failed) => {
            eprintln!("{} step(s) failed", failed);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}
