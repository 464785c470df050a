use anyhow::Result;
use chatlink::predictor::{PredictOptions, Predictor};
use chatlink::providers::factory::{get_provider, ProviderType};
use chatlink::toolkit::Toolkit;
use chatlink::tools::CalculatorTool;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod configuration;

use configuration::Settings;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    shared: SharedArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct SharedArgs {
    /// Vendor to use: anthropic or openai (defaults to the configured provider)
    #[arg(long, global = true)]
    provider: Option<ProviderType>,

    /// Sampling temperature between 0 and 2 (can also be set via CHATLINK_PREDICT__TEMPERATURE)
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Maximum number of tokens to generate (can also be set via CHATLINK_PREDICT__MAX_TOKENS)
    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    /// System prompt placed before each user prompt
    #[arg(long, global = true)]
    system: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Predict a reply to a single prompt
    Predict {
        prompt: String,

        /// Print the reply as it is generated
        #[arg(long)]
        stream: bool,

        /// Offer the calculator tool to the model
        #[arg(long)]
        calculator: bool,
    },

    /// Predict replies to every prompt in a file, one prompt per line
    Batch {
        file: PathBuf,

        /// Maximum number of requests in flight (can also be set via CHATLINK_PREDICT__MAX_CONCURRENT)
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::new()?;
    let predict_settings = &settings.predict;

    let options = PredictOptions::new()
        .with_temperature(cli.shared.temperature.unwrap_or(predict_settings.temperature))
        .with_max_tokens(cli.shared.max_tokens.unwrap_or(predict_settings.max_tokens));
    let default_max_concurrent = predict_settings.max_concurrent;

    let predictor = Predictor::new(get_provider(
        settings.provider_config(cli.shared.provider)?,
    )?);
    let system = cli.shared.system.as_deref();

    match cli.command {
        Command::Predict {
            prompt,
            stream,
            calculator,
        } => {
            let options = if calculator {
                options.with_toolkit(Toolkit::new().with_tool(CalculatorTool::new()))
            } else {
                options
            };
            commands::predict::execute(&predictor, &prompt, system, stream, &options).await
        }
        Command::Batch {
            file,
            max_concurrent,
        } => {
            let max_concurrent = max_concurrent.unwrap_or(default_max_concurrent);
            commands::batch::execute(&predictor, &file, system, max_concurrent, &options).await
        }
    }
}
