//! Stream a reply token by token, then print the reassembled message.
//!
//! Cancels the stream after 30 seconds to show caller-driven cancellation;
//! Ctrl-C cancels it sooner.
//!
//! # Usage
//!
//! ```bash
//! ANTHROPIC_API_KEY=sk-ant-... cargo run --example stream_message
//! ```

use std::io::Write;
use std::time::Duration;

use anthropic_rs::prelude::*;
use futures::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 1. Create the client from the environment.
    let client = AnthropicClient::from_env()?;

    // 2. Build the request.
    let request = MessageRequest::new(anthropic_rs::DEFAULT_MODEL, 1024)
        .with_system("You are a concise technical writer.")
        .with_message(Message::user(
            "Explain server-sent events to a Rust developer in one paragraph.",
        ));

    // 3. Wire a cancellation token to a wall-clock limit and Ctrl-C.
    let cancel = CancellationToken::new();
    let limit = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(30)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        limit.cancel();
    });

    let options = RequestOptions::new()
        .with_timeout(Duration::from_secs(60))
        .with_cancel(cancel);

    // 4. Print text as it arrives and keep every event.
    let mut events = client.stream(&request, options).await?;
    let mut builder = MessageBuilder::new();
    while let Some(event) = events.next().await {
        let event = event?;
        if let StreamEvent::ContentBlockDelta {
            delta: ContentDelta::TextDelta { text },
            ..
        } = &event
        {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        builder.apply(&event);
    }

    // 5. Print the reassembled message.
    let message = builder.finish();
    println!(
        "\n\n--- {} | stop_reason={:?} | {} tokens ---",
        message.id,
        message.stop_reason,
        message.usage.total_tokens()
    );

    Ok(())
}
