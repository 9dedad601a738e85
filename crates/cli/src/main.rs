use anyhow::Result;
use clap::Parser;

mod chat;
mod cli;
mod inference;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("logs", "cortex.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "unknown panic"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(target: "panic", "crash at {}: {}", location, msg);
        eprintln!("crash at {}: {}", location, msg);
    }));

    tracing::info!("cortex started");

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Chat(args)) => chat::run(args)?,
        Some(Commands::Run(args)) => inference::run(args)?,
        None => chat::run(cli::ChatArgs {
            model: std::path::PathBuf::from("."),
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
        })?,
    }

    Ok(())
}
