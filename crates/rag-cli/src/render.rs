//! Plain-text rendering of transcripts and listings.

use rag_client::{Message, Role, SessionSummary, Source};

pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}

pub fn render_sources(sources: &[Source]) -> String {
    let mut out = String::new();
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!("  [{}] {}", i + 1, source.label()));
        if let Some(score) = source.score {
            out.push_str(&format!(" ({score:.2})"));
        }
        out.push('\n');
    }
    out
}

pub fn render_message(message: &Message) -> String {
    let mut out = format!(
        "[{}] {}: {}",
        message.timestamp.format("%H:%M"),
        role_label(message.role),
        message.content
    );
    if message.is_incomplete() {
        out.push_str(" [incomplete]");
    }
    out.push('\n');
    if !message.sources.is_empty() {
        out.push_str("sources:\n");
        out.push_str(&render_sources(&message.sources));
    }
    out
}

pub fn render_transcript(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "(empty conversation)\n".to_string();
    }
    messages.iter().map(render_message).collect()
}

pub fn render_summaries(summaries: &[SessionSummary]) -> String {
    if summaries.is_empty() {
        return "no sessions\n".to_string();
    }
    let mut out = String::new();
    for summary in summaries {
        let title = summary.title.as_deref().unwrap_or("untitled");
        let updated = summary
            .updated_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!("{}  {updated}  {title}", summary.id));
        if let Some(count) = summary.message_count {
            out.push_str(&format!(" ({count} messages)"));
        }
        out.push('\n');
    }
    out
}
