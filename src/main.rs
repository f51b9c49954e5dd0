//! Lex Emulator - scenario runner
//!
//! Loads a bot export, wires up the configured fulfillment hook and runs
//! scenario files against the emulator, stopping at the first failure.

use clap::Parser;
use lex_emulator::fulfillment::{CommandHook, HttpHook};
use lex_emulator::{BotDefinition, DialogEngine, EmulatorConfig, Scenario, TestDriver};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lex-emulator")]
#[command(about = "Run dialog scenarios against an exported bot", long_about = None)]
struct Args {
    /// Bot export directory
    #[arg(long)]
    bot: PathBuf,

    /// Subprocess hook command line, split on whitespace
    #[arg(long, conflicts_with = "hook_url")]
    hook_command: Option<String>,

    /// HTTP hook endpoint
    #[arg(long)]
    hook_url: Option<String>,

    /// Scenario files (YAML or JSON)
    #[arg(required = true)]
    scenarios: Vec<PathBuf>,
}

impl Args {
    fn hook_argv(&self) -> Option<Vec<String>> {
        let argv: Vec<String> = self
            .hook_command
            .as_deref()?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        (!argv.is_empty()).then_some(argv)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lex_emulator=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = EmulatorConfig::from_env();
    let bot = Arc::new(BotDefinition::load(&args.bot, &config)?);

    let mut engine = DialogEngine::new(bot, config);
    if let Some(hook) = args.hook_argv().as_deref().and_then(CommandHook::from_argv) {
        tracing::info!(command = ?args.hook_command, "Using subprocess hook");
        engine = engine.with_hook(Arc::new(hook));
    } else if let Some(url) = &args.hook_url {
        tracing::info!(url = %url, "Using HTTP hook");
        engine = engine.with_hook(Arc::new(HttpHook::new(url.clone())));
    } else {
        tracing::warn!("No fulfillment hook configured; code hook intents will fail");
    }

    let driver = TestDriver::new(&engine);
    for path in &args.scenarios {
        let scenario = Scenario::load(path)?;
        driver.run(&scenario).await?;
    }

    tracing::info!(scenarios = args.scenarios.len(), "All scenarios passed");
    Ok(())
}
