use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use embebot_core::ids::ApplicationId;
use embebot_discord::{
    definitions, DiscordApi, DiscordRest, EmbedVerifier, MessageRelay, SettingsCommands, UrlMatcher,
};
use embebot_gateway::{drain_handlers, GatewayBuilder, GatewayConfig};
use embebot_server::{AppState, ServerConfig};
use embebot_store::{Database, GuildSettingsRepo};
use embebot_telemetry::{init_telemetry, TelemetryConfig};

/// Discord bot that replies to social media links with embed-friendly
/// rewrites.
#[derive(Parser)]
#[command(name = "embebot", version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[arg(long, env = "EMBEBOT_DATA_DIR", default_value = "data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the gateway and serve the control API (default).
    Run(RunArgs),
    /// Overwrite the application's global slash commands.
    RegisterCommands {
        #[arg(long, env = "DISCORD_APPLICATION_ID")]
        application_id: String,
    },
}

/// How long in-flight handlers get to finish on shutdown.
const HANDLER_GRACE: Duration = Duration::from_secs(10);

#[derive(Args, Clone)]
struct RunArgs {
    #[arg(long, env = "EMBEBOT_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "EMBEBOT_PORT", default_value_t = 8787)]
    port: u16,

    /// Bearer token for the control routes that change state or read logs.
    #[arg(long, env = "EMBEBOT_CONTROL_TOKEN", hide_env_values = true)]
    control_token: Option<String>,

    #[arg(long, env = "EMBEBOT_HEALTH_INTERVAL_SECS", default_value_t = 60)]
    health_interval_secs: u64,

    #[arg(long, env = "EMBEBOT_GATEWAY_URL")]
    gateway_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let token = SecretString::from(
        cli.token
            .clone()
            .context("DISCORD_BOT_TOKEN is not set")?,
    );

    match cli.command {
        Some(Command::RegisterCommands { application_id }) => {
            init_telemetry(TelemetryConfig {
                log_to_sqlite: false,
                ..Default::default()
            });
            register(token, ApplicationId::from_raw(application_id)).await
        }
        Some(Command::Run(args)) => run(token, cli.data_dir, args).await,
        None => run(token, cli.data_dir, cli.run).await,
    }
}

async fn register(token: SecretString, application: ApplicationId) -> anyhow::Result<()> {
    let rest = DiscordRest::new(token)?;
    let commands = definitions();
    rest.register_commands(&application, &commands).await?;
    info!(count = commands.len(), application_id = %application, "slash commands registered");
    Ok(())
}

async fn run(token: SecretString, data_dir: PathBuf, args: RunArgs) -> anyhow::Result<()> {
    let telemetry = init_telemetry(TelemetryConfig::with_data_dir(&data_dir));
    info!(data_dir = %data_dir.display(), "starting embebot");

    let db = Database::open(&data_dir.join("embebot.db")).context("open database")?;
    let api: Arc<dyn DiscordApi> = Arc::new(DiscordRest::new(token.clone())?);
    let matcher = Arc::new(UrlMatcher::new()?);

    let mut config = GatewayConfig::new(token);
    if let Some(url) = args.gateway_url {
        config = config.with_gateway_url(url);
    }

    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();

    let relay = MessageRelay::new(api.clone(), GuildSettingsRepo::new(db.clone()), matcher);
    let commands = SettingsCommands::new(api.clone(), GuildSettingsRepo::new(db.clone()));
    let (gateway, actor) = GatewayBuilder::new(config, db, Arc::new(EmbedVerifier::new(api)))
        .tracker(tracker.clone())
        .on_message(Arc::new(relay))
        .on_interaction(Arc::new(commands))
        .spawn(cancel.clone())?;

    let server_config = ServerConfig {
        host: args.host,
        port: args.port,
        health_interval: Duration::from_secs(args.health_interval_secs),
        ..Default::default()
    };
    let state = AppState {
        gateway: gateway.clone(),
        telemetry,
        control_token: args.control_token.map(SecretString::from),
    };
    let server = embebot_server::start(server_config, state, cancel.clone())
        .await
        .context("start control server")?;

    gateway.connect().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    // Handlers still need the actor to queue verifications.
    drain_handlers(&tracker, HANDLER_GRACE).await;
    cancel.cancel();
    actor.await?;
    server.join().await;
    Ok(())
}
