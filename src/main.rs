use std::path::Path;
use std::process::ExitCode;

use convo_inbox::config::{InboxConfig, OutputFormat};
use convo_inbox::error::{Error, Result};
use convo_inbox::mailbox::ImapSource;
use convo_inbox::pipeline::{ProcessedMessage, poll_once};
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if matches!(e, Error::Config(_)) {
                eprintln!(
                    "  export CONVO_IMAP_HOST=imap.example.com CONVO_USERNAME=... CONVO_PASSWORD=..."
                );
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = InboxConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    // A provider may already be installed by a linked crate; either way one is present.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let source = ImapSource::new(config.mailbox.clone());
    let messages = poll_once(&config, &source).await?;

    print_summary(&messages, config.output_format);
    Ok(())
}

/// Stderr logging plus an optional daily rolling file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "convo-inbox.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    guard
}

fn print_summary(messages: &[ProcessedMessage], format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(messages) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "Failed to serialize summary"),
        },
        OutputFormat::Text => {
            for message in messages {
                println!("{message}");
                println!("\n---\n");
            }
        }
    }
}
