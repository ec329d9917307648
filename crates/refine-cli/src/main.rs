mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    // Cargar .env si existe (DATABASE_URL, REFINE_*)
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
                             .with_writer(std::io::stderr)
                             .init();

    let cli = cli::Cli::parse();
    if let Err(e) = commands::run(cli) {
        eprintln!("[refine] error: {e}");
        std::process::exit(e.exit_code());
    }
}
