// Import and re-export the `error` module
pub use self::error::{CliError, Result};
mod error;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands};
use session::ChatSession;
use tokio::io::{AsyncBufReadExt, BufReader};

mod cli;
mod logging;
mod session;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    logging::init()?;

    let args = Cli::parse();

    if let Some(Commands::Version) = args.command {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()?;
    let session = ChatSession::new(client, args.url, args.api_key, args.site_url);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(execute(&session, args.command))
}

async fn execute(session: &ChatSession, command: Option<Commands>) -> Result<()> {
    match command {
        Some(Commands::Send { message, thread_id }) => {
            if let Some(thread_id) = thread_id {
                session.set_thread_id(thread_id);
            }
            if let Some(reply) = session.send(&message).await? {
                println!("{reply}");
            }
            if let Some(thread_id) = session.thread_id() {
                eprintln!("thread: {thread_id}");
            }
            Ok(())
        }
        Some(Commands::Status) => {
            let report = session.status().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(Commands::Chat) | None => chat_loop(session).await,
        Some(Commands::Version) => Ok(()),
    }
}

async fn chat_loop(session: &ChatSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut queued: Option<String> = None;

    eprintln!("Type a message and press Enter. /reset starts over, /quit exits.");
    loop {
        let line = match queued.take() {
            Some(line) => line,
            None => tokio::select! {
                next = lines.next_line() => match next? {
                    Some(line) => line,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            },
        };
        let message = line.trim();
        match message {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                session.reset();
                eprintln!("(conversation reset)");
                continue;
            }
            _ => {}
        }

        let reply = session.send(message);
        tokio::pin!(reply);
        tokio::select! {
            result = &mut reply => match result {
                Ok(Some(text)) => println!("{text}"),
                Ok(None) => {}
                Err(CliError::Server { message, retryable, .. }) => {
                    let hint = if retryable { " (you can try again)" } else { "" };
                    eprintln!("! {message}{hint}");
                }
                Err(e) => return Err(e),
            },
            next = lines.next_line() => {
                // A newer submission replaces the pending one.
                match next? {
                    Some(next) => {
                        eprintln!("(previous request abandoned)");
                        queued = Some(next);
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                session.abort();
                eprintln!("(cancelled)");
            }
        }
    }
    Ok(())
}
