//! rag-assistant: command-line front end for the RAG assistant backend.

mod chat;
mod cli;
mod render;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use rag_client::{
    ControllerOptions, ExchangeMode, HttpTransport, QueryRequest, ServiceClient,
    SessionController, SessionId,
};
use rag_common::ClientError;
use rag_config::RagConfig;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command};

fn init_logging(directive: &str) {
    let directive = directive
        .parse::<Directive>()
        .unwrap_or_else(|_| Directive::from(LevelFilter::INFO));
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> RagConfig {
    let loaded = match &args.config {
        Some(path) => rag_config::load_config_from(path),
        None => rag_config::load_config(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("warning: {e}; using default configuration");
        RagConfig::default()
    });
    if let Some(base_url) = &args.base_url {
        config.api.base_url = base_url.clone();
    }
    config
}

fn mode(config: &RagConfig, no_stream: bool) -> ExchangeMode {
    if config.chat.stream && !no_stream {
        ExchangeMode::Streaming
    } else {
        ExchangeMode::SingleShot
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    let config = load_config(&args);

    let directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.directive());
    init_logging(&directive);

    tracing::debug!(base_url = %config.api.base_url, "starting rag-assistant");

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: RagConfig) -> Result<(), ClientError> {
    let transport = Arc::new(HttpTransport::new(
        config.api.base_url.clone(),
        Duration::from_secs(u64::from(config.api.timeout_secs)),
        Duration::from_secs(u64::from(config.api.connect_timeout_secs)),
    )?);
    let options = ControllerOptions {
        fallback_to_single_shot: config.chat.fallback_to_single_shot,
        max_decode_errors: config.chat.max_decode_errors,
    };
    let mut controller = SessionController::new(transport.clone(), options);
    let service = ServiceClient::new(transport);

    let command = args.command.unwrap_or(Command::Chat {
        session: None,
        no_stream: false,
    });

    match command {
        Command::Chat { session, no_stream } => {
            if let Some(id) = session {
                controller.load_session(&SessionId::from(id)).await?;
                print!("{}", render::render_transcript(controller.messages()));
            }
            chat::run(&mut controller, mode(&config, no_stream)).await?;
        }
        Command::Ask {
            question,
            session,
            no_stream,
            json,
        } => {
            if let Some(id) = session {
                controller.load_session(&SessionId::from(id)).await?;
            }
            let streaming = !json;
            let mut printed = 0usize;
            let answer = controller
                .ask(question, mode(&config, no_stream), |text| {
                    if streaming {
                        if let Some(fresh) = text.get(printed..) {
                            print!("{fresh}");
                            let _ = std::io::stdout().flush();
                            printed = text.len();
                        }
                    }
                })
                .await?;

            if json {
                let value = serde_json::json!({
                    "session_id": controller.session_id(),
                    "message": answer,
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
                );
            } else {
                if printed == 0 {
                    print!("{}", answer.content);
                }
                println!();
                if !answer.sources.is_empty() {
                    print!("sources:\n{}", render::render_sources(&answer.sources));
                }
                if let Some(id) = controller.session_id() {
                    eprintln!("session: {id}");
                }
            }
        }
        Command::Sessions => {
            let summaries = controller.directory_mut().list().await?;
            print!("{}", render::render_summaries(&summaries));
        }
        Command::Show { id } => {
            let session = controller
                .directory_mut()
                .fetch(&SessionId::from(id))
                .await?;
            if let Some(title) = &session.title {
                println!("# {title}");
            }
            print!("{}", render::render_transcript(&session.messages));
        }
        Command::Delete { id } => {
            let id = SessionId::from(id);
            controller.directory_mut().delete(&id).await?;
            println!("deleted session {id}");
        }
        Command::Upload { path } => {
            let ack = service.upload_document(&path).await?;
            println!(
                "{}: {} ({} chunks)",
                ack.status,
                ack.message.as_deref().unwrap_or("uploaded"),
                ack.chunks
            );
            if let Some(id) = ack.document_id {
                println!("document id: {id}");
            }
        }
        Command::Query {
            question,
            top_k,
            method,
        } => {
            let request = QueryRequest::new(question)
                .top_k(top_k.unwrap_or(config.query.top_k))
                .method(method.unwrap_or(config.query.method));
            let answer = service.query(&request).await?;
            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                print!("sources:\n{}", render::render_sources(&answer.sources));
            }
        }
        Command::Health => {
            let health = service.health().await?;
            let timestamp = health.timestamp.as_deref().unwrap_or("-");
            println!("{} at {timestamp}", health.status);
            if !health.is_healthy() {
                return Err(ClientError::InvalidResponse(format!(
                    "backend reports status {}",
                    health.status
                )));
            }
        }
        Command::Config => println!("{}", rag_config::config_to_json(&config)),
    }

    Ok(())
}
