//! Vesper binary: config, collaborator wiring, wake loop, Ctrl-C.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use vesper::audio::{ProcessCapture, ProcessSink};
use vesper::config::{AssistantConfig, VisualBackend};
use vesper::dispatch::CommandDispatcher;
use vesper::llm::{LanguageModel, OllamaClient};
use vesper::pipeline::Orchestrator;
use vesper::speech::{PiperSynthesizer, WhisperClient};
use vesper::visual::{HttpVisual, NoopVisual, ProcessVisual, VisualStateController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vesper=info")),
        )
        .init();

    let config_path = parse_config_arg()?;
    let config = AssistantConfig::load(config_path.as_deref()).context("loading configuration")?;
    config.validate().context("validating configuration")?;

    let system_prompt = config
        .llm
        .system_prompt
        .clone()
        .unwrap_or_else(|| vesper::prompt::SYSTEM_PROMPT.to_owned());

    let visual: Arc<dyn VisualStateController> = match config.visual.backend {
        VisualBackend::Process => Arc::new(ProcessVisual::new(&config.visual)),
        VisualBackend::Http => Arc::new(HttpVisual::new(&config.visual.url)),
        VisualBackend::Off => Arc::new(NoopVisual),
    };
    let dispatcher = Arc::new(CommandDispatcher::new(visual));

    let llm = Arc::new(OllamaClient::new(&config.llm, &system_prompt).context("LLM client")?);
    if config.llm.preload {
        llm.preload().await;
    }

    let orchestrator = Orchestrator::new(
        Box::new(ProcessCapture::new(&config.audio)),
        Arc::new(WhisperClient::new(&config.stt)),
        llm,
        Arc::new(PiperSynthesizer::new(&config.tts)),
        Arc::new(ProcessSink::new(&config.playback)),
        dispatcher,
        shutdown_on_ctrl_c(),
    );

    tracing::info!("vesper started; listening for the wake word");
    orchestrator
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("vesper exited with error: {e}"))?;
    tracing::info!("vesper shut down cleanly");
    Ok(())
}

/// `vesper [--config <path>]`
fn parse_config_arg() -> anyhow::Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(None),
        Some("--config") => {
            let path = args.next().context("--config requires a path")?;
            Ok(Some(PathBuf::from(path)))
        }
        Some(other) => anyhow::bail!("unknown argument '{other}' (usage: vesper [--config <path>])"),
    }
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            token.cancel();
        }
    });
    shutdown
}
