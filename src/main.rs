use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ride_pool::{
    config::{Cli, Command, ServeArgs},
    http::{AppState, router, spawn_expiry_sweep, start_server},
    profile::UserProfile,
    service::RideService,
    store::RideStore,
    utils::new_user_id,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Command::Serve(args) => serve(args, open_store(&cli.db_path)?).await,
        Command::AddUser(args) => {
            args.auth.validate().map_err(|e| anyhow!(e))?;
            let tokens = args.auth.token_issuer()?;
            let store = open_store(&cli.db_path)?;
            let user_id = new_user_id()?;
            let profile = UserProfile::new(&user_id, &args.full_name, &args.email, &args.college_name);
            store.put_profile(&profile)?;
            store.flush()?;

            println!("user id: {user_id}");
            println!("token:   {}", tokens.issue(&user_id, &args.email)?);
            Ok(())
        }
        Command::IssueToken(args) => {
            args.auth.validate().map_err(|e| anyhow!(e))?;
            let tokens = args.auth.token_issuer()?;
            println!("{}", tokens.issue(&args.user_id, &args.email)?);
            Ok(())
        }
    }
}

fn open_store(path: &Path) -> anyhow::Result<Arc<RideStore>> {
    RideStore::open(path).with_context(|| format!("failed to open database at {}", path.display()))
}

async fn serve(args: ServeArgs, store: Arc<RideStore>) -> anyhow::Result<()> {
    args.validate().map_err(|e| anyhow!(e)).context("invalid configuration")?;

    let service = RideService::new(store.clone())
        .with_policy(args.match_policy())
        .with_write_retries(args.write_retries);
    let state = Arc::new(AppState {
        service,
        tokens: args.auth.token_issuer()?,
    });

    if let Some(minutes) = args.waiting_expiry_minutes {
        info!(minutes, "waiting rides expire after their pickup time");
        spawn_expiry_sweep(state.clone(), chrono::Duration::minutes(minutes));
    } else {
        info!("waiting rides never expire");
    }

    let app = router(state, &args.cors_origin_list());

    info!("Binding to {}", args.listen);
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    start_server(listener, app).await?;

    store.flush()?;
    Ok(())
}
