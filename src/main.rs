use std::sync::Arc;

use clap::Parser;
use sqlx::PgConnection;
use tracing::info;

use rest_mapper::api::{self, AppState};
use rest_mapper::config::config;
use rest_mapper::database::DatabaseManager;
use rest_mapper::hook::{RegistryBuilder, ResourceType};
use rest_mapper::mapper::Mapper;
use rest_mapper::strategy::{BatchPolicy, OwnershipLinkage, OwnershipStrategy};
use rest_mapper::telemetry;

#[derive(Debug, Parser)]
#[command(name = "rest-mapper", version, about = "Permission-aware CRUD server over Postgres")]
struct Args {
    /// Port to listen on (defaults to the configured port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Resource types to serve, as NAME or NAME:TABLE
    #[arg(short = 't', long = "type", value_name = "NAME[:TABLE]", default_value = "notes")]
    types: Vec<String>,

    /// Create missing tables for the served types before listening
    #[arg(long)]
    install: bool,

    /// Drop malformed elements of a batch patch instead of failing the batch
    #[arg(long)]
    partial_patch: bool,
}

fn parse_type(arg: &str) -> Result<ResourceType, rest_mapper::hook::RegistryError> {
    let (name, table) = arg.split_once(':').unwrap_or((arg, arg));
    ResourceType::new(name, table)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL etc.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let args = Args::parse();
    let config = config();
    info!("Starting rest-mapper in {:?} mode", config.environment);

    let mut builder = RegistryBuilder::<PgConnection>::new();
    for arg in &args.types {
        builder.register_type(parse_type(arg)?)?;
    }
    let registry = Arc::new(builder.build_with(&config.pipeline));

    let policy = if args.partial_patch {
        BatchPolicy::PartialPatch
    } else {
        BatchPolicy::AllOrNothing
    };
    let strategy = OwnershipStrategy::new(OwnershipLinkage).with_batch_policy(policy);

    let pool = DatabaseManager::connect(&config.database).await?;
    if args.install {
        let mut conn = pool.acquire().await?;
        for rtype in registry.types() {
            strategy.install(&mut conn, rtype).await?;
        }
    }

    let mapper = Mapper::new(registry, strategy).with_config(config.pipeline.clone());
    let app = api::router(AppState {
        pool,
        mapper: Arc::new(mapper),
    });

    let port = args.port.unwrap_or(config.api.port);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("rest-mapper listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
