//! Gemini chatbot server and terminal client.
//!
//! Entry point: loads configuration, resolves the Gemini credential, then
//! either serves the web UI or runs the terminal chat loop.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tracing::info;

use gemini_chatbot::config::{AppConfig, Cli, Command, load_gemini_settings};
use gemini_chatbot::llm::GeminiProvider;
use gemini_chatbot::relay::Relay;
use gemini_chatbot::{repl, server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let cli = Cli::parse();
    let config = match AppConfig::load(&cli) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    telemetry::init(config.logging.format);

    // The credential must resolve before any provider exists.
    let settings = match load_gemini_settings(&config.llm) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        system_instruction = settings.system_instruction.is_some(),
        "LLM configuration loaded"
    );

    let provider = GeminiProvider::new(settings)?;
    let relay = Relay::new(Arc::new(provider));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::start_server(config, relay).await,
        Command::Repl { no_stream } => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            repl::run(&relay, stdin, tokio::io::stdout(), !no_stream).await
        }
    }
}
