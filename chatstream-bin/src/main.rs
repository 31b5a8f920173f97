use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use chatstream_core::{
    ChatClient, ChatUpdate, FrameDecoder, SessionOutcome, config::ClientCfg,
    normalizer::OrderedSet,
};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "chatstream: stream chat replies from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one or more messages to a conversation, printing tokens live
    Send {
        #[arg(long, help = "Client config file (JSON or TOML)")]
        config: PathBuf,
        #[arg(long, help = "Conversation id")]
        chat: String,
        #[arg(short, long = "message", required = true, help = "Message text; repeat to send several in turn")]
        messages: Vec<String>,
        #[arg(long, help = "Cancel a reply that takes longer than this")]
        timeout_secs: Option<u64>,
    },
    /// Decode a captured event stream (file or stdin) and print records as JSON lines
    Decode {
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Send {
            config,
            chat,
            messages,
            timeout_secs,
        } => {
            let cfg = ClientCfg::from_path(&config)?;
            let client = ChatClient::from_cfg(&cfg)?;
            let mut server_ids = OrderedSet::new();

            for message in messages {
                let (tx, mut rx) = mpsc::unbounded_channel::<ChatUpdate>();
                let handle = client.send_message(&chat, &message, tx)?;
                let cancel = handle.cancel_handle();

                let timer = timeout_secs.map(|secs| {
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(secs)).await;
                        tracing::info!(secs, "reply timed out, cancelling");
                        cancel.cancel();
                    })
                });

                let mut failed = None;
                loop {
                    let update = tokio::select! {
                        update = rx.recv() => update,
                        _ = tokio::signal::ctrl_c() => {
                            cancel.cancel();
                            continue;
                        }
                    };
                    let Some(update) = update else { break };
                    match update {
                        ChatUpdate::Token(token) => {
                            print!("{token}");
                            io::stdout().flush().ok();
                        }
                        ChatUpdate::Complete { server_id, .. } => {
                            println!();
                            if let Some(id) = server_id {
                                server_ids.insert(id);
                            }
                        }
                        ChatUpdate::Error(err) => {
                            println!();
                            failed = Some(err);
                        }
                        _ => {}
                    }
                }

                if let Some(timer) = timer {
                    timer.abort();
                }
                let outcome = handle.wait().await;
                if let Some(err) = failed {
                    anyhow::bail!("streaming failed: {err}");
                }
                if outcome == SessionOutcome::Cancelled {
                    eprintln!("[stopped]");
                    break;
                }
            }

            if !server_ids.is_empty() {
                let ids: Vec<&str> = server_ids.iter().map(String::as_str).collect();
                eprintln!("[message ids: {}]", ids.join(", "));
            }
        }
        Commands::Decode { file } => {
            let raw = match file {
                Some(path) => tokio::fs::read(path).await?,
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };
            let mut decoder = FrameDecoder::new();
            let mut records = decoder.feed_bytes(&raw);
            records.extend(decoder.flush());
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }

    Ok(())
}
