//! Send a message to the Anthropic Messages API and print the reply.
//!
//! Reads the API key from `ANTHROPIC_API_KEY` and, if set, the endpoint from
//! `ANTHROPIC_BASE_URL`. Ctrl-C cancels the in-flight call.
//!
//! # Examples
//!
//! ```sh
//! # Basic request
//! anthropic --user "Explain SSE in two sentences"
//!
//! # Stream tokens as they arrive
//! anthropic --stream --system "You are terse." --user "Name five crates"
//!
//! # Pipe content from stdin
//! cat notes.md | anthropic --system "Summarize these notes." --stdin
//!
//! # Print the full response JSON
//! anthropic --user "hi" --raw
//! ```

use std::io::{self, Read, Write};
use std::process;
use std::time::Duration;

use anthropic_rs::api::streaming::{ContentDelta, StreamEvent};
use anthropic_rs::{
    AnthropicClient, CancellationToken, ClientConfig, DEFAULT_MODEL, Error, Message,
    MessageRequest, RequestOptions, Result,
};
use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

/// Send a message to the Anthropic Messages API and print the reply.
///
/// Reads the API key from the ANTHROPIC_API_KEY environment variable.
#[derive(Parser)]
#[command(name = "anthropic")]
struct Cli {
    // ── Message content ────────────────────────────────────────
    /// System prompt to set the assistant's behavior
    #[arg(long)]
    system: Option<String>,

    /// User message to send
    #[arg(long)]
    user: Option<String>,

    /// Read user content from stdin
    #[arg(long)]
    stdin: bool,

    // ── Model and sampling ─────────────────────────────────────
    /// Model to use
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Maximum tokens in the response
    #[arg(long, default_value_t = 1024)]
    max_tokens: u32,

    /// Sampling temperature (0.0 – 1.0)
    #[arg(long)]
    temperature: Option<f32>,

    // ── Transport ──────────────────────────────────────────────
    /// Per-attempt timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Retries after the first failed send
    #[arg(long)]
    max_retries: Option<u32>,

    // ── Output mode ────────────────────────────────────────────
    /// Print text deltas as they arrive
    #[arg(long)]
    stream: bool,

    /// Print the full response JSON (or every event, with --stream)
    #[arg(long)]
    raw: bool,
}

/// Read all of stdin into a string.
fn read_stdin_content() -> Result<String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| Error::Config(format!("failed to read stdin: {e}")))?;
    Ok(buf)
}

fn flush(out: &mut impl Write) -> Result<()> {
    out.flush()
        .map_err(|e| Error::Config(format!("failed to write stdout: {e}")))
}

/// Combine `--user` and `--stdin` into one user turn.
fn build_user_content(cli: &Cli) -> Result<String> {
    let stdin_text = if cli.stdin {
        Some(read_stdin_content()?)
    } else {
        None
    };

    match (&cli.user, stdin_text) {
        (Some(msg), Some(piped)) => Ok(format!("{msg}\n\n{piped}")),
        (Some(msg), None) => Ok(msg.clone()),
        (None, Some(piped)) => Ok(piped),
        (None, None) => Err(Error::Config("provide --user, --stdin, or both".into())),
    }
}

fn build_request(cli: &Cli, user_content: String) -> MessageRequest {
    let mut request =
        MessageRequest::new(&cli.model, cli.max_tokens).with_message(Message::user(user_content));
    if let Some(system) = &cli.system {
        request = request.with_system(system);
    }
    if let Some(temperature) = cli.temperature {
        request = request.with_temperature(temperature);
    }
    request
}

fn build_options(cli: &Cli, cancel: CancellationToken) -> RequestOptions {
    let mut options = RequestOptions::new().with_cancel(cancel);
    if let Some(secs) = cli.timeout_secs {
        options = options.with_timeout(Duration::from_secs(secs));
    }
    if let Some(retries) = cli.max_retries {
        options = options.with_max_retries(retries);
    }
    options
}

async fn run(cli: &Cli, cancel: CancellationToken) -> Result<()> {
    let client = AnthropicClient::with_config(ClientConfig::from_env()?)?;
    let request = build_request(cli, build_user_content(cli)?);
    let options = build_options(cli, cancel);

    // ── Single-shot mode ────────────────────────────────────────
    if !cli.stream {
        let response = client.send(&request, options).await?;
        if cli.raw {
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else {
            println!("{}", response.text());
        }
        return Ok(());
    }

    // ── Streaming mode ──────────────────────────────────────────
    let mut events = client.stream(&request, options).await?;
    let mut stdout = io::stdout();
    while let Some(event) = events.next().await {
        let event = event?;
        if cli.raw {
            println!("{event:?}");
            continue;
        }
        match event {
            StreamEvent::ContentBlockDelta {
                delta: ContentDelta::TextDelta { text },
                ..
            } => {
                print!("{text}");
                flush(&mut stdout)?;
            }
            StreamEvent::MessageDelta { delta, usage } => {
                tracing::debug!(
                    "stop_reason={:?}, output_tokens={}",
                    delta.stop_reason,
                    usage.output_tokens
                );
            }
            _ => {}
        }
    }
    if !cli.raw {
        println!();
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match run(&cli, cancel).await {
        Ok(()) => {}
        Err(Error::Cancelled) => {
            eprintln!("Cancelled.");
            process::exit(130);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
