use anyhow::Result;
use tracing::debug;

use claude_usage_monitor::auth::SessionAuthenticator;
use claude_usage_monitor::cli::{Args, Command};
use claude_usage_monitor::config::Config;
use claude_usage_monitor::context::MonitorContext;
use claude_usage_monitor::display::{
    print_auth_status, print_history, print_message, print_session_state, print_snapshot,
    print_totals,
};
use claude_usage_monitor::store::SessionStore;
use claude_usage_monitor::usage::LocalUsageAggregator;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ctx = MonitorContext::new(Config::from_args(&args));
    let cfg = ctx.config();
    debug!(?cfg, "resolved configuration");

    match args.command {
        Command::Session => {
            let aggregator = LocalUsageAggregator::from_config(cfg);
            let snapshot = aggregator.current_session_snapshot().await;
            if snapshot.is_active {
                SessionStore::from_config(cfg)
                    .sync_with_snapshot(&snapshot, cfg.token_limit)
                    .await?;
            }
            print_snapshot(&snapshot, cfg.token_limit, aggregator.workspace(), args.json);
        }
        Command::Totals { since } => {
            let aggregator = LocalUsageAggregator::from_config(cfg);
            let totals = aggregator.usage_totals(since).await;
            print_totals(&totals, since, args.json);
        }
        Command::AuthStatus => {
            let auth = SessionAuthenticator::from_config(cfg);
            print_auth_status(auth.has_stored_session().await, auth.profile_dir(), args.json);
        }
        Command::ClearSession => {
            let outcome = SessionAuthenticator::from_config(cfg).clear_session().await;
            print_message(outcome.success, &outcome.message, args.json);
        }
        Command::History => {
            let store = SessionStore::from_config(cfg);
            print_history(&store.history().await, args.json);
        }
        Command::StartSession { ref description } => {
            let store = SessionStore::from_config(cfg);
            let session = store.start_new_session(description, cfg.token_limit).await?;
            print_session_state(&session, args.json);
        }
    }

    ctx.shutdown();
    Ok(())
}
