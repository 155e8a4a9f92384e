//! Interactive chat loop over stdin.

use std::io::Write;

use rag_client::{ClientError, ControllerEvent, ExchangeMode, SessionController, SessionId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::render;

const HELP: &str = "\
commands:
  /new            start a new session
  /load <id>      continue a stored session
  /sessions       list stored sessions
  /history        print the current transcript
  /help           show this help
  /quit           exit
Ctrl-C cancels an answer in progress.
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Question(String),
    New,
    Load(String),
    Sessions,
    History,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Question(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("new", _) => Input::New,
        ("load", id) if !id.is_empty() => Input::Load(id.to_string()),
        ("sessions", _) => Input::Sessions,
        ("history", _) => Input::History,
        ("help", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

pub async fn run(controller: &mut SessionController, mode: ExchangeMode) -> Result<(), ClientError> {
    println!("rag-assistant chat. /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt(controller);
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Question(question) => exchange(controller, question, mode).await,
            Input::New => {
                controller.new_session();
                println!("started a new session");
            }
            Input::Load(id) => match controller.load_session(&SessionId::from(id)).await {
                Ok(()) => print!("{}", render::render_transcript(controller.messages())),
                Err(e) => eprintln!("error: {e}"),
            },
            Input::Sessions => match controller.directory_mut().list().await {
                Ok(summaries) => print!("{}", render::render_summaries(&summaries)),
                Err(e) => eprintln!("error: {e}"),
            },
            Input::History => print!("{}", render::render_transcript(&controller.transcript())),
            Input::Help => print!("{HELP}"),
            Input::Quit => break,
            Input::Unknown(command) => eprintln!("unknown command: {command} (try /help)"),
        }
    }

    controller.cancel();
    Ok(())
}

fn prompt(controller: &SessionController) {
    match controller.session_id() {
        Some(id) => print!("[{id}] > "),
        None => print!("> "),
    }
    let _ = std::io::stdout().flush();
}

/// Send one question and print the answer as it arrives.
async fn exchange(controller: &mut SessionController, question: String, mode: ExchangeMode) {
    if let Err(e) = controller.send(question, mode) {
        eprintln!("error: {e}");
        return;
    }

    let mut printed = 0usize;
    loop {
        let event = tokio::select! {
            event = controller.next_update() => event,
            _ = tokio::signal::ctrl_c() => {
                controller.cancel();
                println!("\n[cancelled]");
                return;
            }
        };

        match event {
            Some(ControllerEvent::Progress { text, .. }) => {
                if printed == 0 {
                    print!("assistant: ");
                }
                if let Some(fresh) = text.get(printed..) {
                    print!("{fresh}");
                    printed = text.len();
                }
                let _ = std::io::stdout().flush();
            }
            Some(ControllerEvent::FellBack { reason, .. }) => {
                debug!(%reason, "streaming unavailable");
                eprintln!("(streaming unavailable, waiting for the full answer)");
                printed = 0;
            }
            Some(ControllerEvent::Completed { .. }) => {
                let Some(answer) = controller.messages().last() else {
                    return;
                };
                if printed == 0 {
                    print!("assistant: {}", answer.content);
                }
                println!();
                if !answer.sources.is_empty() {
                    print!("sources:\n{}", render::render_sources(&answer.sources));
                }
                return;
            }
            Some(ControllerEvent::Failed { error, .. }) => {
                if printed > 0 {
                    println!(" [incomplete]");
                }
                eprintln!("error: {error}");
                controller.dismiss_error();
                return;
            }
            None => return,
        }
    }
}
