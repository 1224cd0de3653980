//! Answerflow - Streaming Answers From the Command Line
//!
//! Asks one question through the stream coordinator and prints the answer as
//! it is paced out, or replays a previously completed answer from the replay
//! cache.
//!
//! # Usage
//!
//! ```bash
//! # Ask with the configured transports
//! answerflow ask "What is a borrow checker?"
//!
//! # Force a transport order and a push endpoint
//! answerflow ask --transports push,local --push-endpoint http://localhost:8080/stream "Hi"
//!
//! # Print the final snapshot as JSON
//! answerflow ask --json "Explain lifetimes"
//!
//! # Replay a cached answer and dump its audio
//! answerflow replay conv-1 msg-1 --audio-out answer.ogg
//!
//! # Verbose logging
//! RUST_LOG=debug answerflow ask "Hi"
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{debug, info, warn};

use answerflow_core::config::parse_preference;
use answerflow_core::{
    create_fallback_resolver, default_config_path, load_config_from_path, new_message_id,
    ChunkPayload, ConfigOverrides, EngineConfig, FallbackSnapshotOptions, HttpKernel, Kernel,
    RequestHooks, StaticKernel, StreamCoordinator, StreamError, StreamRequest, StreamSnapshot,
};

/// Answerflow - streaming multi-modal answers
#[derive(Parser, Debug)]
#[command(name = "answerflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, env = "ANSWERFLOW_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "ANSWERFLOW_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a question and stream the answer
    Ask(AskArgs),
    /// Replay a cached answer
    Replay(ReplayArgs),
}

#[derive(ClapArgs, Debug)]
struct AskArgs {
    /// The question
    prompt: String,

    /// Answer mode forwarded to producers
    #[arg(short = 'm', long, default_value = "chat")]
    mode: String,

    /// Conversation id
    #[arg(long, default_value = "cli")]
    conversation: String,

    /// Message id (generated when omitted)
    #[arg(long)]
    message: Option<String>,

    /// Fixed fallback answer instead of calling the inference kernel
    #[arg(long, value_name = "TEXT")]
    answer: Option<String>,

    /// Transport preference, comma separated (push,socket,peer,local)
    #[arg(short = 't', long, value_delimiter = ',')]
    transports: Option<Vec<String>>,

    /// Push-channel endpoint
    #[arg(long, value_name = "URL")]
    push_endpoint: Option<String>,

    /// Socket-channel endpoint
    #[arg(long, value_name = "URL")]
    socket_endpoint: Option<String>,

    /// Do not read or write the replay cache
    #[arg(long)]
    no_cache: bool,

    /// Print the final snapshot as JSON instead of streaming text
    #[arg(long)]
    json: bool,
}

#[derive(ClapArgs, Debug)]
struct ReplayArgs {
    /// Conversation id
    conversation: String,

    /// Message id
    message: String,

    /// Write the cached audio buffer to this file
    #[arg(long, value_name = "FILE")]
    audio_out: Option<PathBuf>,

    /// Print the cached snapshot as JSON
    #[arg(long)]
    json: bool,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("answerflow={level},answerflow_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<EngineConfig> {
    let path = path.or_else(default_config_path);
    load_config_from_path(path).context("Failed to load configuration")
}

fn overrides(args: &AskArgs) -> Result<ConfigOverrides> {
    let mut overrides = ConfigOverrides::new();
    if let Some(names) = &args.transports {
        overrides = overrides.with_preference(parse_preference(names)?);
    }
    if let Some(endpoint) = &args.push_endpoint {
        overrides = overrides.with_push_endpoint(endpoint.clone());
    }
    if let Some(endpoint) = &args.socket_endpoint {
        overrides = overrides.with_socket_endpoint(endpoint.clone());
    }
    if args.no_cache {
        overrides = overrides.with_cache_enabled(false);
    }
    Ok(overrides)
}

fn kernel_for(config: &EngineConfig, answer: Option<&str>) -> Arc<dyn Kernel> {
    if let Some(answer) = answer {
        return Arc::new(StaticKernel::new(answer));
    }
    match &config.kernel.endpoint {
        Some(endpoint) => Arc::new(HttpKernel::new(
            endpoint.clone(),
            config.kernel.api_key.clone(),
            config.kernel.timeout,
        )),
        None => {
            warn!("No inference kernel configured, answering with a placeholder");
            Arc::new(StaticKernel::new(
                "No inference kernel is configured for local answers.",
            ))
        }
    }
}

fn print_json(snapshot: &StreamSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    println!("{json}");
    Ok(())
}

async fn ask(mut config: EngineConfig, args: AskArgs) -> Result<()> {
    overrides(&args)?.apply(&mut config)?;
    debug!(source = %config.source, preference = ?config.transports.preference, "Effective configuration");

    let message_id = args.message.clone().unwrap_or_else(new_message_id);
    let request = StreamRequest::new(&args.prompt, &args.conversation, &message_id)
        .with_mode(&args.mode);
    let resolver = create_fallback_resolver(
        kernel_for(&config, args.answer.as_deref()),
        &request,
        FallbackSnapshotOptions::default(),
    );
    let hooks = RequestHooks::new(resolver).on_error(|e| warn!(error = %e, "Stream reported an error"));

    let coordinator = StreamCoordinator::from_config(&config);
    let session = coordinator.start_stream(request, hooks);

    if !args.json {
        session.on_text(|update| {
            if let ChunkPayload::Text(text) = &update.chunk.payload {
                let mut stdout = std::io::stdout().lock();
                let _ = write!(stdout, "{}", text.text);
                let _ = stdout.flush();
            }
        });
    }

    let outcome = tokio::select! {
        outcome = session.completion() => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling stream");
            session.cancel();
            session.completion().await
        }
    };

    match outcome {
        Ok(snapshot) => {
            if args.json {
                print_json(&snapshot)?;
            } else {
                println!();
            }
            info!(
                conversation = %args.conversation,
                message = %message_id,
                transport = %snapshot.transport,
                "Answer complete"
            );
            Ok(())
        }
        Err(StreamError::Cancelled) => {
            println!();
            Ok(())
        }
        Err(e) => Err(e).context("Stream failed"),
    }
}

async fn replay(config: EngineConfig, args: ReplayArgs) -> Result<()> {
    let cache = StreamCoordinator::from_config(&config).cache().clone();
    if !cache.is_enabled() {
        anyhow::bail!("The replay cache is disabled in the configuration");
    }

    let mut audio = None;
    let Some(snapshot) = cache
        .replay_audio(&args.conversation, &args.message, |chunk| {
            if let ChunkPayload::Audio(chunk) = &chunk.payload {
                audio = Some(chunk.bytes.clone());
            }
        })
        .await
    else {
        anyhow::bail!(
            "No cached answer for conversation {} message {}",
            args.conversation,
            args.message
        );
    };

    if let Some(path) = &args.audio_out {
        let bytes = audio.context("The cached answer has no audio")?;
        tokio::fs::write(path, &bytes)
            .await
            .with_context(|| format!("Failed to write audio to {}", path.display()))?;
        info!(path = %path.display(), bytes = bytes.len(), "Wrote cached audio");
    }

    if args.json {
        print_json(&snapshot)
    } else {
        println!("{}", snapshot.text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = load_config(cli.config)?;
    match cli.command {
        Command::Ask(args) => ask(config, args).await,
        Command::Replay(args) => replay(config, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use answerflow_core::TransportKind;

    fn ask_args(argv: &[&str]) -> AskArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Command::Ask(args) => args,
            Command::Replay(_) => panic!("expected ask"),
        }
    }

    #[test]
    fn test_ask_flags_become_overrides() {
        let args = ask_args(&[
            "answerflow",
            "ask",
            "--transports",
            "push,local",
            "--push-endpoint",
            "http://localhost:9000/stream",
            "--no-cache",
            "Hello?",
        ]);
        let mut config = EngineConfig::default();
        overrides(&args).unwrap().apply(&mut config).unwrap();

        assert_eq!(
            config.transports.preference,
            vec![TransportKind::PushChannel, TransportKind::LocalFallback]
        );
        assert_eq!(
            config.transports.push_endpoint.as_deref(),
            Some("http://localhost:9000/stream")
        );
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_unknown_transport_is_rejected() {
        let args = ask_args(&["answerflow", "ask", "--transports", "carrier-pigeon", "Hi"]);
        assert!(overrides(&args).is_err());
    }

    #[test]
    fn test_replay_args_parse() {
        let cli = Cli::try_parse_from(["answerflow", "replay", "conv-1", "msg-1", "--json"]).unwrap();
        let Command::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(args.conversation, "conv-1");
        assert_eq!(args.message, "msg-1");
        assert!(args.json);
        assert!(args.audio_out.is_none());
    }
}
