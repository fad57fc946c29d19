use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use voxd::config::Config;
use voxd::ipc::{IpcServer, PromptHandler, PromptReply, PromptRequest};
use voxd::pipeline::{PipelineManager, PipelineMode, create_pipeline};

#[derive(Parser, Debug)]
#[command(name = "voxd", version, about = "Local voice assistant runtime")]
struct Cli {
    /// Run the text-in/text-out socket server instead of the voice loop
    #[arg(long)]
    server: bool,

    /// Configuration file path
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Unix socket path for server mode
    #[arg(long, short)]
    socket: Option<PathBuf>,
}

struct PipelineHandler {
    pipeline: Arc<PipelineManager>,
}

#[async_trait::async_trait]
impl PromptHandler for PipelineHandler {
    async fn handle(&self, request: PromptRequest) -> PromptReply {
        let pipeline = self.pipeline.clone();
        let result =
            tokio::task::spawn_blocking(move || pipeline.process_text_input(&request.prompt))
                .await;

        match result {
            Ok(Ok(response)) => PromptReply::response(response),
            Ok(Err(e)) => PromptReply::error(e.to_string()),
            Err(e) => PromptReply::error(format!("handler failed: {}", e)),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let settings = Config::load_or_default(&config_path).with_env_overrides();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.server {
        run_server_mode(&runtime, settings, cli.socket)
    } else {
        run_voice_mode(&runtime, settings)
    }
}

fn run_voice_mode(runtime: &tokio::runtime::Runtime, settings: Config) -> ExitCode {
    let pipeline = match create_pipeline(PipelineMode::VoiceAssistant, &settings) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("failed to create pipeline: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = pipeline.start() {
        error!("failed to start pipeline: {}", e);
        return ExitCode::FAILURE;
    }
    info!("listening for speech, press Ctrl+C to stop");

    let _ = runtime.block_on(tokio::signal::ctrl_c());

    info!("shutting down");
    pipeline.stop();
    ExitCode::SUCCESS
}

fn run_server_mode(
    runtime: &tokio::runtime::Runtime,
    settings: Config,
    socket: Option<PathBuf>,
) -> ExitCode {
    let pipeline = match create_pipeline(PipelineMode::TextOnly, &settings) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            error!("failed to create pipeline: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = pipeline.start() {
        error!("failed to start pipeline: {}", e);
        return ExitCode::FAILURE;
    }

    let socket_path = socket
        .or_else(|| settings.server.socket.clone())
        .unwrap_or_else(IpcServer::default_socket_path);
    let server = Arc::new(IpcServer::new(socket_path));

    let exit = runtime.block_on(async {
        let handler = PipelineHandler {
            pipeline: pipeline.clone(),
        };

        let accept_server = server.clone();
        let accept = tokio::spawn(async move { accept_server.start(handler).await });

        let code = tokio::select! {
            result = accept => match result {
                Ok(Ok(())) => ExitCode::SUCCESS,
                Ok(Err(e)) => {
                    error!("server failed: {}", e);
                    ExitCode::FAILURE
                }
                Err(e) => {
                    error!("server task failed: {}", e);
                    ExitCode::FAILURE
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = server.stop().await;
                ExitCode::SUCCESS
            }
        };
        code
    });

    pipeline.stop();
    exit
}
