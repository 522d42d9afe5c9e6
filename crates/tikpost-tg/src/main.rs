use futures::prelude::*;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use tikpost_tg::tracing_err;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = dotenvy::dotenv() {
        eprintln!("No .env file was loaded ({err}), using the process environment only");
    }

    let logging_task = tikpost_tg::init_logging();

    tikpost_tg::init_metrics();

    let exit_code = AssertUnwindSafe(run_bot())
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            error!("Exiting due to a panic...");
            ExitCode::FAILURE
        });

    logging_task.shutdown().await;

    exit_code
}

async fn run_bot() -> ExitCode {
    let config = tikpost_tg::Config::load_or_panic();

    match tikpost_tg::run(config).await {
        Ok(()) => {
            info!("Bot has shut down");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(err = tracing_err(&err), "Exiting with an error...");
            ExitCode::FAILURE
        }
    }
}
