// src/main.rs

use execworker::{cli, logging, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("execworker error: {err:?}");
        std::process::exit(1);
    }
    // After Ctrl-C the stdin reader may still be parked in a blocking read,
    // which would hold up runtime shutdown.
    std::process::exit(0);
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
