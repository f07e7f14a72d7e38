use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod configuration;
mod error;
mod replay;

use configuration::Settings;
use replay::{read_snapshots, render, replay_ai_sdk, replay_langchain, report_run, Format};
use strand::providers::ai_sdk::UiMessage;
use strand::providers::langchain::LangChainMessage;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSONL recording of store snapshots through a thread
    Replay {
        /// Recording with one `{"isRunning", "messages"}` snapshot per line
        file: PathBuf,

        /// Shape of the recorded messages
        #[arg(short, long, value_enum, default_value = "ai-sdk")]
        format: Format,

        /// Thread id used for run reports (defaults to a random id)
        #[arg(long)]
        thread_id: Option<String>,

        /// Report the finished run to the cloud endpoint (ai-sdk only)
        #[arg(long)]
        report: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            file,
            format,
            thread_id,
            report,
        } => {
            let settings = Settings::new()?;
            match format {
                Format::AiSdk => {
                    let snapshots = read_snapshots::<UiMessage>(&file)?;
                    let last = snapshots
                        .last()
                        .map(|snapshot| snapshot.messages.clone())
                        .unwrap_or_default();
                    let outcome = replay_ai_sdk(snapshots)?;
                    print!("{}", render(&outcome));

                    if report {
                        let thread_id =
                            thread_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                        match report_run(&settings, &thread_id, &last).await? {
                            Some(receipt) => println!("reported run {}", receipt.run_id),
                            None => println!("nothing to report"),
                        }
                    }
                }
                Format::LangChain => {
                    if report {
                        anyhow::bail!("--report is only supported for ai-sdk recordings");
                    }
                    let snapshots = read_snapshots::<LangChainMessage>(&file)?;
                    let outcome = replay_langchain(snapshots)?;
                    print!("{}", render(&outcome));
                }
            }
        }
    }

    Ok(())
}
