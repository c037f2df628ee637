use std::io::Write;
use std::sync::Arc;

use futures_util::StreamExt;

use chatwire::config::{load_config, AdapterConfig};
use chatwire::message::{ContentPart, Message, MessageStatus, Role};
use chatwire::observability::init_tracing;
use chatwire::run::{AdapterOptions, ChatAdapter, HeaderSource, RunCallbacks, RunInput};
use chatwire::tools::ToolRegistry;

fn main() {
    let config = load_config("chatwire.yaml").unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'chatwire.example.yaml' to 'chatwire.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.log_level);

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        eprintln!("usage: chatwire <prompt>");
        std::process::exit(2);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(async move {
        run(config, prompt).await;
    });
}

async fn run(config: AdapterConfig, prompt: String) {
    let adapter = build_adapter(&config).unwrap_or_else(|e| {
        eprintln!("Failed to build adapter: {e}");
        std::process::exit(1);
    });

    let input = RunInput {
        system: config.system_prompt.clone(),
        messages: vec![Message::text(Role::User, prompt)],
        ..RunInput::default()
    };

    let mut run = adapter.run(input);
    let mut printed = 0usize;
    let mut last_status = MessageStatus::Running;
    let mut stdout = std::io::stdout();

    while let Some(item) = run.snapshots.next().await {
        match item {
            Ok(snapshot) => {
                let text = snapshot.text();
                if text.len() > printed {
                    let _ = stdout.write_all(text[printed..].as_bytes());
                    let _ = stdout.flush();
                    printed = text.len();
                }
                for part in &snapshot.parts {
                    if let ContentPart::ToolCall(call) = part {
                        tracing::debug!(
                            call_id = %call.call_id,
                            tool = %call.name,
                            state = ?call.state,
                            "tool call"
                        );
                    }
                }
                last_status = snapshot.status.clone();
            }
            Err(err) => {
                eprintln!();
                eprintln!("run failed: {err}");
                std::process::exit(1);
            }
        }
    }

    println!();
    match last_status {
        MessageStatus::Complete { reason } => {
            tracing::info!(reason = ?reason, "run complete");
        }
        MessageStatus::Errored { message } => {
            eprintln!("server reported an error: {message}");
            std::process::exit(1);
        }
        MessageStatus::Running => {
            tracing::warn!("stream ended without a finish event");
        }
    }
}

fn build_adapter(config: &AdapterConfig) -> Result<ChatAdapter, Box<dyn std::error::Error>> {
    let options = AdapterOptions {
        endpoint: config.endpoint_url()?,
        headers: HeaderSource::Static(config.header_map()?),
        transport: config.transport_options(),
        extra_body: config.extra_body.clone(),
        callbacks: RunCallbacks::new(),
    };
    Ok(ChatAdapter::new(options, Arc::new(ToolRegistry::new()))?)
}
