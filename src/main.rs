use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gator::commands::{App, Cli};
use gator::config::Config;
use gator::db::Database;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout is the command's output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gator=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            e.print()?;
            return Ok(ExitCode::FAILURE);
        }
        // --help and --version
        Err(e) => {
            e.print()?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    let config_path = Config::default_path()?;
    let config = Config::load_or_create(&config_path)?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| config.db_url.clone());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    debug!(%database_url, "Database ready");

    let mut app = App::new(db, config, config_path)?;
    let mut stdout = std::io::stdout();
    app.run(cli.command, &mut stdout).await?;

    Ok(ExitCode::SUCCESS)
}
