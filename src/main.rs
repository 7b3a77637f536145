use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kiro_voice::capture::{CaptureOutcome, CaptureState, SessionController, SessionEvent, StopOutcome};
use kiro_voice::cleanup::{CleanupGateway, ModelReadiness, OllamaManager};
use kiro_voice::engine::{BinaryStore, ProvisionOutcome, Provisioner};
use kiro_voice::{
    create_router, AppState, Config, ControllerHandle, LaunchPlan, Launcher, NatsClient, NatsSink,
    StdoutSink, TextSink,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiro-voice")]
#[command(about = "Voice capture service: engine provisioning, capture sessions and text cleanup")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/kiro-voice")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Download the engine for this platform if needed
    Provision,
    /// Capture one session from the terminal; press Enter to stop
    Record,
    /// Make sure the local cleanup model is pulled
    SetupModel {
        /// Pull the model if it is missing
        #[arg(long)]
        pull: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries transcripts
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Serve => serve(cfg).await,
        Command::Provision => provision(cfg).await,
        Command::Record => record(cfg).await,
        Command::SetupModel { pull } => setup_model(cfg, pull).await,
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let launcher = Arc::new(build_launcher(&cfg)?);
    let controller = build_controller(&cfg).await?;
    let (handle, task) = ControllerHandle::spawn(controller);

    let app = create_router(AppState::new(handle.clone(), launcher));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP control API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    // Kill a still-running engine
    if let Err(e) = handle.shutdown().await {
        warn!("Controller already stopped: {}", e);
    }
    task.await.context("Capture controller task panicked")?;

    Ok(())
}

async fn provision(cfg: Config) -> Result<()> {
    let launcher = build_launcher(&cfg)?;
    let platform = launcher.platform();

    match launcher.provisioner().ensure(platform).await? {
        ProvisionOutcome::Ready(path) => {
            println!("{}", path.display());
            Ok(())
        }
        ProvisionOutcome::Unavailable(unavailable) => bail!(unavailable.user_message()),
    }
}

async fn record(cfg: Config) -> Result<()> {
    let launcher = build_launcher(&cfg)?;
    let spec = match launcher.prepare().await? {
        LaunchPlan::Ready(spec) => spec,
        LaunchPlan::Unavailable(unavailable) => bail!(unavailable.user_message()),
    };

    let mut controller = build_controller(&cfg).await?;
    if let Err(e) = controller.start(&spec) {
        bail!("{}\n{}", e, e.remediation());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let outcome = loop {
        tokio::select! {
            event = controller.wait_process_event() => {
                let Some(event) = event else { break None };
                match controller.handle_process_event(event).await {
                    Some(SessionEvent::StateChanged { to: CaptureState::Listening, .. }) => {
                        eprintln!("Listening... press Enter to stop");
                    }
                    Some(SessionEvent::Finished { outcome, .. }) => break Some(outcome),
                    _ => {}
                }
            }

            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(_)) => {
                        controller.stop().await;
                    }
                    // Silence detection still ends the session
                    _ => stdin_open = false,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                if controller.stop().await == StopOutcome::AlreadyStopping {
                    controller.shutdown().await;
                    bail!("Capture aborted");
                }
            }
        }
    };

    match outcome {
        Some(CaptureOutcome::Delivered { .. }) | None => Ok(()),
        Some(CaptureOutcome::NoVoiceDetected) => {
            eprintln!("No voice detected");
            Ok(())
        }
        Some(CaptureOutcome::EngineFailed { code }) => {
            bail!("Voice engine exited with code {:?}", code)
        }
        Some(CaptureOutcome::SinkFailed { text, error }) => {
            // Keep the text rather than lose it
            println!("{}", text);
            bail!("Failed to deliver transcript: {}", error)
        }
    }
}

async fn setup_model(cfg: Config, pull: bool) -> Result<()> {
    let ollama = OllamaManager::new(&cfg.cleanup.ollama_path);
    let (progress_tx, mut progress_rx) = watch::channel(0u8);

    let model = cfg.cleanup.model.clone();
    let reporter = tokio::spawn(async move {
        while progress_rx.changed().await.is_ok() {
            let percent = *progress_rx.borrow_and_update();
            eprint!("\rPulling {}... {}%", model, percent);
        }
        eprintln!();
    });

    let readiness = ollama
        .ensure_model(&cfg.cleanup.model, pull || cfg.cleanup.auto_pull, Some(&progress_tx))
        .await;
    drop(progress_tx);
    let _ = reporter.await;

    match readiness {
        ModelReadiness::Ready => {
            println!("Model {} is ready", cfg.cleanup.model);
            Ok(())
        }
        ModelReadiness::NotInstalled => {
            bail!("Ollama is not installed. Get it from https://ollama.com/download")
        }
        ModelReadiness::Missing => bail!(
            "Model {} is not pulled. Run again with --pull",
            cfg.cleanup.model
        ),
        ModelReadiness::PullFailed => bail!("Failed to pull model {}", cfg.cleanup.model),
    }
}

fn build_launcher(cfg: &Config) -> Result<Launcher> {
    let store = BinaryStore::new(cfg.engine.storage_dir());
    let provisioner = Provisioner::new(store, (&cfg.engine.release).into())?;
    Ok(Launcher::new(&cfg.engine, cfg.capture, Arc::new(provisioner)))
}

async fn build_controller(cfg: &Config) -> Result<SessionController> {
    let sink: Arc<dyn TextSink> = match &cfg.nats.url {
        Some(url) => {
            let client = NatsClient::connect(
                url,
                cfg.service.name.clone(),
                cfg.nats.subject_prefix.clone(),
            )
            .await?;
            info!("Publishing transcripts on {}", client.subject());
            Arc::new(NatsSink::new(client))
        }
        None => Arc::new(StdoutSink),
    };

    let controller = SessionController::new(sink);
    if cfg.cleanup.enabled {
        Ok(controller.with_cleaner(Arc::new(CleanupGateway::from_config(&cfg.cleanup))))
    } else {
        Ok(controller)
    }
}
