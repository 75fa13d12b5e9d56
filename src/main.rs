use anyhow::{Context, Result};
use clap::Parser;
use gmail_mcp::cli::{self, Cli};
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        eprintln!("\nFor help, run: gmail-mcp --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_mcp=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_mcp=info,warn"))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::debug!("Running {}", cli.command.operation());

    match cli::execute(&cli).await {
        Ok(output) => {
            let rendered =
                serde_json::to_string_pretty(&output).context("Failed to render result")?;
            println!("{}", rendered);
            Ok(())
        }
        Err(tool_error) => {
            let rendered = serde_json::to_string_pretty(&tool_error)
                .context("Failed to render error")?;
            eprintln!("{}", rendered);
            process::exit(1);
        }
    }
}
