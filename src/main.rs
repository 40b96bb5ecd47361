use std::process::ExitCode;

use storescu::config::{config::remote_node, Cli, Config};
use storescu::{logging, Target};
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::from_args();
    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("storescu: {}", e);
            return Ok(ExitCode::from(1));
        }
    };
    let _log = logging::install(&config.logging)?;
    if cli.arguments {
        tracing::info!("Arguments: {:?}", cli);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping at the next PDU boundary");
            on_signal.cancel();
        }
    });

    let target = Target {
        node: remote_node(&cli),
        file: cli.dcmfile_in.clone(),
    };
    let outcome = storescu::run(config, target, cancel).await;
    Ok(ExitCode::from(outcome.exit_code()))
}
