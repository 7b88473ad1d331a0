use anyhow::Context;
use clap::{Parser, Subcommand};
use parley_config::load as load_config;
use parley_database::{run_migrations, ConversationRepository, MessageRepository};
use parley_gateway::{create_router, GatewayState};
use parley_runtime::{telemetry, BackendServices};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "parley-server")]
#[command(about = "Parley chat fan-out backend (serves HTTP by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Dump conversations and their messages in position order
    DumpData,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing().context("failed to initialise tracing")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::Migrate => migrate().await,
        Commands::DumpData => dump_data().await,
    }
}

async fn run_server() -> anyhow::Result<()> {
    info!("starting Parley backend");

    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;
    let broadcast = services.spawn_broadcast_loop();

    let state = GatewayState::new(services.coordinator.clone(), services.outbound_buffer);
    let app = create_router(state);

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, instance_id = %services.coordinator.instance_id(), "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(parley_runtime::shutdown_signal())
        .await
        .context("http server error")?;

    broadcast.abort();
    info!("backend shut down");
    Ok(())
}

async fn migrate() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;

    let pool = parley_database::prepare_database(&config.database).await?;
    run_migrations(&pool).await?;

    println!("Migrations applied to {}", config.database.url);
    Ok(())
}

async fn dump_data() -> anyhow::Result<()> {
    info!("dumping conversations from database");

    let config = load_config().context("failed to load configuration")?;
    let pool = parley_database::initialize_database(&config.database)
        .await
        .context("failed to open database")?;

    let conversations = ConversationRepository::new(pool.clone())
        .list_all()
        .await
        .context("failed to fetch conversations")?;
    let messages = MessageRepository::new(pool);

    println!("=== CONVERSATIONS ===");
    if conversations.is_empty() {
        println!("No conversations found in database");
        return Ok(());
    }

    for conversation in conversations {
        println!(
            "\n{} [{}] {} participants: {}",
            conversation.id,
            conversation.kind,
            conversation.name,
            conversation.participant_ids.join(", ")
        );
        println!(
            "{:<6} {:<38} {:<20} {:<8} {:<50}",
            "Pos", "Message ID", "Sender", "Flags", "Content (truncated)"
        );
        println!("{}", "-".repeat(125));

        let history = messages
            .dump(&conversation.id)
            .await
            .with_context(|| format!("failed to fetch messages for {}", conversation.id))?;

        for message in history {
            let flags = match (message.is_deleted, message.is_edited) {
                (true, _) => "deleted",
                (false, true) => "edited",
                (false, false) => "",
            };
            let content: String = if message.content.chars().count() > 47 {
                format!("{}...", message.content.chars().take(44).collect::<String>())
            } else {
                message.content.clone()
            };

            println!(
                "{:<6} {:<38} {:<20} {:<8} {:<50}",
                message.position, message.id, message.sender_id, flags, content
            );
        }
    }

    Ok(())
}
