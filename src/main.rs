//! Recall CLI
//!
//! Chat with an OpenAI-compatible model while Recall keeps the conversation
//! memory bounded (compression) or relevant (mem0 search).

use clap::Parser;
use futures::StreamExt;
use recall::{
    ChatAssistant, ConversationId, MemoryBackend, MemoryProvider, MessageStore, OpenAiGenerator,
    RecallConfig, TextGenerator,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Recall - chat with bounded, relevant memory
#[derive(Parser, Debug)]
#[command(name = "recall")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file (default: ~/.recall/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Memory provider: compression or mem0
    #[arg(long)]
    provider: Option<MemoryBackend>,

    /// Conversation id the memory is kept under
    #[arg(long, default_value = "default")]
    conversation: String,

    /// Print reply chunks as they arrive
    #[arg(long)]
    stream: bool,

    /// Verbose output: debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the stored memory as JSON and exit
    #[arg(long)]
    show_memory: bool,

    /// Message to send; reads lines from stdin when empty
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut config = RecallConfig::load(cli.config.as_deref())?;
    if let Some(provider) = cli.provider {
        config.memory.provider = provider;
        config.validate()?;
    }
    info!("Starting Recall ({:?} memory)", config.memory.provider);

    let generator: Arc<dyn TextGenerator> = Arc::new(OpenAiGenerator::new(&config.llm)?);
    let provider = Arc::new(MemoryProvider::from_config(&config, generator.clone())?);
    let assistant = ChatAssistant::new(provider.clone(), generator);
    let id = ConversationId::new(cli.conversation.clone());

    if cli.show_memory {
        let messages = provider.store().get(&id).await?;
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    if !cli.prompt.is_empty() {
        let prompt = cli.prompt.join(" ");
        return send(&assistant, &id, &prompt, cli.stream).await;
    }

    run_repl(&assistant, &id, cli.stream).await
}

async fn run_repl(assistant: &ChatAssistant, id: &ConversationId, stream: bool) -> anyhow::Result<()> {
    let (line_tx, mut line_rx) = mpsc::channel::<String>(32);

    // Spawn blocking thread to read from stdin
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    print_prompt()?;
    while let Some(line) = line_rx.recv().await {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" | "/exit" => break,
            "/clear" => {
                assistant.provider().get(id)?.clear().await?;
                println!("Memory cleared for {}", id);
            }
            "/memory" => {
                let messages = assistant.provider().store().get(id).await?;
                println!("{}", serde_json::to_string_pretty(&messages)?);
            }
            prompt => {
                if let Err(e) = send(assistant, id, prompt, stream).await {
                    error!("Chat failed: {:#}", e);
                }
            }
        }
        print_prompt()?;
    }

    info!("Recall shutdown complete");
    Ok(())
}

async fn send(
    assistant: &ChatAssistant,
    id: &ConversationId,
    prompt: &str,
    stream: bool,
) -> anyhow::Result<()> {
    if !stream {
        let reply = assistant.chat(id, prompt).await?;
        println!("{}", reply);
        return Ok(());
    }

    let mut chunks = assistant.chat_streaming(id, prompt).await?;
    let mut stdout = io::stdout();
    while let Some(chunk) = chunks.next().await {
        write!(stdout, "{}", chunk?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

fn print_prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}
