use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use tether_auth::{AnthropicOAuth, AuthStore, OAuthFlow};
use tether_settings::TetherSettings;
use tether_telemetry::TelemetryConfig;

#[derive(Parser)]
#[command(name = "tether", version, about = "Session orchestration for agent chats")]
struct Cli {
    /// Settings file (defaults to ~/.tether/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authorize with Anthropic and store the credentials.
    Login,
    /// Show whether credentials are stored.
    Status,
    /// Forget stored credentials.
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => tether_settings::load_settings_from_path(path),
        None => tether_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let telemetry = TelemetryConfig {
        json: settings.logging.json,
        ..TelemetryConfig::default()
    }
    .with_level_name(&settings.logging.level);
    tether_telemetry::init_telemetry(&telemetry)?;

    let store = AuthStore::with_file(auth_file(&settings));
    let flow = OAuthFlow::new(Arc::new(AnthropicOAuth::default()), store.clone());

    match cli.command {
        Command::Login => login(&flow).await,
        Command::Status => {
            let status = flow.status();
            println!("{}", serde_json::to_string(&status)?);
            Ok(())
        }
        Command::Logout => {
            store.clear().context("failed to clear credentials")?;
            tracing::info!("credentials cleared");
            println!("Logged out.");
            Ok(())
        }
    }
}

async fn login(flow: &OAuthFlow) -> anyhow::Result<()> {
    let started = flow.start();
    println!("{}\n\n{}\n", started.instructions, started.url);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let Some(code) = lines.next_line().await? else {
        flow.cancel();
        bail!("no authorization code entered");
    };

    let done = flow.complete(code.trim()).await.context("authorization failed")?;
    println!("Authenticated. Token expires at {} (unix ms).", done.expires_at);
    Ok(())
}

fn auth_file(settings: &TetherSettings) -> PathBuf {
    if settings.auth.auth_file.is_empty() {
        tether_settings::tether_dir().join("auth.json")
    } else {
        PathBuf::from(&settings.auth.auth_file)
    }
}
