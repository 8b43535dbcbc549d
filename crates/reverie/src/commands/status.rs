//! `reverie status` - probe a running server.

use clap::Args;

use super::{CliError, CmdResult, Context};

#[derive(Args)]
pub struct StatusArgs {
    /// Server base URL
    #[arg(long, env = "REVERIE_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    pub server: String,
}

pub async fn run(args: StatusArgs, ctx: &Context) -> CmdResult {
    let url = format!("{}/health", args.server.trim_end_matches('/'));

    let response = reqwest::get(&url)
        .await
        .map_err(|e| CliError::Runtime(anyhow::anyhow!("cannot reach {}: {}", url, e)))?;
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| CliError::Runtime(anyhow::anyhow!("bad health response: {}", e)))?;

    if ctx.verbose {
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        println!(
            "{} ({}): {}",
            args.server,
            status.as_u16(),
            body["status"].as_str().unwrap_or("unknown"),
        );
    }

    if status.is_success() {
        Ok(())
    } else {
        Err(CliError::Runtime(anyhow::anyhow!(
            "server unhealthy: HTTP {}",
            status
        )))
    }
}
