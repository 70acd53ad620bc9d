use std::env;
use std::error::Error;
use std::io;
use std::path::PathBuf;

use rail_reserve::csv::{load_seed, write_snapshot};
use rail_reserve::{App, Config};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: rail-reserve [serve|export] [seed.csv]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let mut config = Config::from_env()?;
    let mut args = env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "serve".to_string());
    if let Some(path) = args.next() {
        config.seed_path = Some(PathBuf::from(path));
    }

    match mode.as_str() {
        "serve" => serve(config).await,
        "export" => export(&config),
        _ => Err(USAGE.into()),
    }
}

fn load(app: &App, config: &Config) -> Result<(), Box<dyn Error>> {
    if let Some(path) = &config.seed_path {
        if !path.extension().is_some_and(|ext| ext == "csv") {
            warn!(path = %path.display(), "seed file seems to not be a csv file");
        }
        let applied = load_seed(&app.inventory, path)?;
        info!(path = %path.display(), rows = applied, trains = app.inventory.len(), "seed loaded");
    }
    Ok(())
}

/// Print the seeded inventory as csv and exit.
fn export(config: &Config) -> Result<(), Box<dyn Error>> {
    let app = App::new(config.payment_timeout);
    load(&app, config)?;
    write_snapshot(io::stdout().lock(), &app.inventory.snapshot())?;
    Ok(())
}

async fn serve(config: Config) -> Result<(), Box<dyn Error>> {
    let app = App::new(config.payment_timeout);
    load(&app, &config)?;

    let sweeper = app.sweeper().spawn(config.sweep_interval);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    let (stop, stopped) = watch::channel(false);
    let server = tokio::spawn(rail_reserve::server::serve(
        listener,
        app.router.clone(),
        stopped,
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    let _ = stop.send(true);
    server.await??;
    sweeper.shutdown().await;
    info!(statistics = %app.coordinator.statistics(), "reservation service stopped");
    Ok(())
}
