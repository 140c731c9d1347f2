use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use school_health_monitor::config::Config;
use school_health_monitor::db::{self, PgStore};
use school_health_monitor::engine::AggregationEngine;
use school_health_monitor::feed::ChangeFeedSubscriber;
use school_health_monitor::models::{Audience, Priority, Role, Session};
use school_health_monitor::outbreak::HttpOutbreakFeed;
use school_health_monitor::report;

#[derive(Parser)]
#[command(name = "school-health-monitor")]
#[command(about = "Operator tool for the school health aggregation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo check-ins with an outbreak spike
    Seed,
    /// Import health reports from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Send a notification immediately
    Broadcast {
        #[arg(long)]
        from: Uuid,
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "all")]
        audience: Audience,
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },
    /// Compute the dashboard once and print it
    Snapshot {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        role: Role,
        #[arg(long)]
        json: bool,
    },
    /// Mark every visible notification read for a user
    MarkAllRead {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        role: Role,
    },
    /// Follow change notifications and log each recomputed dashboard
    Watch {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        role: Role,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = Config::load();
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Inserted {inserted} demo reports and 2 notifications.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} reports from {}.", csv.display());
        }
        Commands::Broadcast {
            from,
            title,
            message,
            audience,
            priority,
        } => {
            let id = db::broadcast(&pool, from, &title, &message, audience, priority).await?;
            println!("Sent notification {id}.");
        }
        Commands::Snapshot { user, role, json } => {
            let engine = build_engine(&config, &pool, Session { user_id: user, role })?;
            let snapshot = engine.refresh().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", report::build_report(&engine.session(), &snapshot));
            }
        }
        Commands::MarkAllRead { user, role } => {
            let engine = build_engine(&config, &pool, Session { user_id: user, role })?;
            let snapshot = engine.mark_all_read().await;
            let unread = snapshot
                .state
                .map(|state| state.badges.notifications)
                .unwrap_or_default();
            println!("{unread} notifications still unread.");
        }
        Commands::Watch { user, role } => {
            let session = Session { user_id: user, role };
            let engine = Arc::new(build_engine(&config, &pool, session)?);
            let cancel = CancellationToken::new();
            let (tx, rx) = mpsc::channel(64);

            let subscriber = ChangeFeedSubscriber::new(pool.clone(), user, config.feed_max_backoff)
                .spawn(tx, cancel.clone());
            let engine_task = tokio::spawn(Arc::clone(&engine).run(rx, cancel.clone()));

            let mut snapshots = engine.subscribe();
            let printer = tokio::spawn(async move {
                while snapshots.changed().await.is_ok() {
                    let snapshot = snapshots.borrow_and_update().clone();
                    if snapshot.loading {
                        continue;
                    }
                    if let Some(state) = &snapshot.state {
                        info!(
                            seq = snapshot.seq,
                            stale = snapshot.stale,
                            status = state.current_health_status.label(),
                            streak = state.streak,
                            messages = state.badges.messages,
                            notifications = state.badges.notifications,
                            alerts = state.badges.alerts,
                            "dashboard updated"
                        );
                    }
                }
            });

            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            cancel.cancel();
            let _ = tokio::join!(subscriber, engine_task);
            printer.abort();
        }
    }

    Ok(())
}

fn build_engine(
    config: &Config,
    pool: &sqlx::PgPool,
    session: Session,
) -> anyhow::Result<AggregationEngine> {
    let store = Arc::new(PgStore::new(pool.clone()));
    let outbreaks = Arc::new(
        HttpOutbreakFeed::new(&config.outbreak_service_url, config.outbreak_timeout)
            .context("failed to build outbreak feed client")?,
    );
    Ok(AggregationEngine::new(
        session,
        store,
        outbreaks,
        config.engine_options(),
    ))
}
