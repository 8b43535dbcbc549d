//! `reverie start` - run the HTTP server.

use clap::Args;

use reverie_server::{ApiError, EngineConfig, Server};

use super::{CliError, CmdResult, Context};

#[derive(Args)]
pub struct StartArgs {
    /// Bind address, e.g. 127.0.0.1:8080
    #[arg(long)]
    pub bind: Option<String>,
}

pub async fn run(args: StartArgs, ctx: &Context) -> CmdResult {
    let mut config = EngineConfig::from_env().map_err(to_cli_error)?;
    config.db_path = ctx.db_path.clone().into();
    if let Some(bind) = args.bind {
        config.bind_address = bind
            .parse()
            .map_err(|_| CliError::Validation(format!("bad bind address '{}'", bind)))?;
    }

    tracing::info!(
        bind = %config.bind_address,
        db = %config.db_path.display(),
        dimensions = config.dimensions,
        metric = %config.distance_metric,
        "starting reverie"
    );

    // Build runs migrations and the vector-store rebuild; both are blocking.
    let server = tokio::task::spawn_blocking(move || Server::build(config))
        .await
        .map_err(|e| CliError::Runtime(anyhow::anyhow!("startup task failed: {}", e)))?
        .map_err(to_cli_error)?;

    server.run().await.map_err(to_cli_error)
}

fn to_cli_error(e: ApiError) -> CliError {
    match e {
        ApiError::Validation(message) => CliError::Validation(message),
        other => CliError::Runtime(anyhow::anyhow!(other)),
    }
}
