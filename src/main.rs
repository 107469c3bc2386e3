use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use voicedesk::api::{ApiServer, ApiState};
use voicedesk::providers::{ElevenLabsSynthesizer, SpeechSynthesizer, VendorFactory};
use voicedesk::session::{SessionRegistry, SessionSettings};
use voicedesk::Config;

/// voicedesk - Voice session orchestrator for phone-style support calls
#[derive(Parser)]
#[command(name = "voicedesk", version, about)]
struct Cli {
    /// Address to bind (overrides `HOST`)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides `PORT`)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Validate configuration and print a redacted summary
    CheckConfig,
    /// Synthesize text with the configured voice and write the audio to a file
    Say {
        /// Text to speak
        text: String,
        /// Output file
        #[arg(short, long, default_value = "voicedesk-say.mp3")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,voicedesk=info",
        1 => "info,voicedesk=debug",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::CheckConfig => check_config(&config),
        Command::Say { text, output } => say(&config, &text, &output).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        stt_model = %config.recognition.options.model,
        llm_model = %config.generation.model,
        tts_model = %config.synthesis.model,
        "starting voicedesk"
    );

    let settings = SessionSettings::from_config(&config)?;
    let livekit = config.livekit.clone();
    let cors_permissive = config.server.cors_permissive;
    let (host, port) = (config.server.host.clone(), config.server.port);

    let factory = Arc::new(VendorFactory::new(config)?);
    let registry = Arc::new(SessionRegistry::new(factory, settings));
    let state = Arc::new(ApiState {
        registry,
        livekit,
        cors_permissive,
    });

    ApiServer::new(state, host, port).run().await?;
    Ok(())
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    let set = |present: bool| if present { "set" } else { "missing" };

    println!(
        "server:      {}:{} (cors {})",
        config.server.host,
        config.server.port,
        if config.server.cors_permissive { "permissive" } else { "same-origin" }
    );
    println!(
        "recognition: {} ({}) key {}",
        config.recognition.options.model,
        config.recognition.options.language,
        set(config.api_keys.deepgram.is_some())
    );
    println!(
        "generation:  {} key {}",
        config.generation.model,
        set(config.api_keys.google.is_some())
    );
    println!(
        "synthesis:   {} voice {} key {}",
        config.synthesis.model,
        config.synthesis.voice_id.as_deref().unwrap_or("<missing>"),
        set(config.api_keys.elevenlabs.is_some())
    );
    println!(
        "livekit:     {} ({})",
        config.livekit.url,
        if config.livekit.is_configured() { "configured" } else { "disabled" }
    );
    println!(
        "timeouts:    generation {:?}, synthesis {:?}",
        config.session.generation_timeout, config.session.synthesis_timeout
    );

    config.validate()?;
    println!("\nconfiguration OK");
    Ok(())
}

async fn say(config: &Config, text: &str, output: &Path) -> anyhow::Result<()> {
    let synthesizer =
        ElevenLabsSynthesizer::new(config.api_keys.elevenlabs.clone(), config.synthesis.clone())?;

    println!("Synthesizing speech...");
    let mut chunks = synthesizer.speak_stream(text).await?;
    let mut file = tokio::fs::File::create(output).await?;
    let mut written = 0;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len();
    }
    file.flush().await?;

    println!("Wrote {written} bytes to {}", output.display());
    Ok(())
}
