use std::sync::Arc;

use clap::{Parser, Subcommand};
use latchkey::authz::loader::load_policies;
use latchkey::authz::web::{router, AppState};
use latchkey::settings::Settings;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "latchkey",
    version,
    about = "Hierarchical access-control decision engine"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the policies and serve the decision API (default)
    Serve,
    /// Load and validate the policies, print a summary and exit
    CheckPolicy,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let authz = load_policies(&settings.policy.policies_dir, settings.policy.include_builtin)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::CheckPolicy => {
            println!(
                "{}: {} permissions, {} roles ({} local), {} groups, {} grants",
                settings.policy.policies_dir.display(),
                authz.registry.permission_count(),
                authz.registry.role_count(),
                authz.registry.local_roles().len(),
                authz.groups.len(),
                authz.grants.grant_count(),
            );
            Ok(())
        }
        Command::Serve => {
            let state = AppState::new(Arc::new(authz)).with_max_depth(settings.engine.max_depth);
            let app = router(Arc::new(state));

            let addr = settings.listen_addr()?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .into_diagnostic()?;
            tracing::info!(%addr, "Authorization decision API listening");
            axum::serve(listener, app).await.into_diagnostic()?;
            Ok(())
        }
    }
}
