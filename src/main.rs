use anyhow::Result;
use poac::cli::PoacCli;
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();
    if let Err(e) = real_main() {
        eprintln!("poac error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("POAC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn real_main() -> Result<()> {
    let cli = PoacCli::parse();
    cli.run()
}
