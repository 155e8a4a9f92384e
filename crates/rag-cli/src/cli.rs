use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rag_common::RetrievalMethod;

/// rag-assistant: chat with a retrieval-augmented question-answering backend.
#[derive(Parser, Debug)]
#[command(name = "rag-assistant", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log directive override (e.g. "rag=debug").
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Backend base URL override.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Interactive conversation (the default).
    Chat {
        /// Continue a stored session.
        #[arg(long)]
        session: Option<String>,
        /// Wait for whole answers instead of streaming them.
        #[arg(long)]
        no_stream: bool,
    },
    /// Ask one question and print the answer.
    Ask {
        question: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        no_stream: bool,
        /// Print the answer message as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List stored sessions.
    Sessions,
    /// Print the transcript of a stored session.
    Show { id: String },
    /// Delete a stored session.
    Delete { id: String },
    /// Upload a document for indexing.
    Upload { path: PathBuf },
    /// One-shot retrieval query outside any session.
    Query {
        question: String,
        #[arg(long)]
        top_k: Option<u32>,
        /// dense, sparse or hybrid.
        #[arg(long)]
        method: Option<RetrievalMethod>,
    },
    /// Check that the backend is up.
    Health,
    /// Print the effective configuration as JSON.
    Config,
}

pub fn parse() -> Args {
    Args::parse()
}
