//! Plain-text rendering of streaming turns.

use std::io::{self, Write};

use chrono::NaiveDate;
use perplexity_oss_core::citation::replace_citations;
use perplexity_oss_core::conversation::DateRange;
use perplexity_oss_core::types::{AgentResponse, AgentSearchStepStatus, ChatMessage};
use perplexity_oss_stream::{TurnPhase, TurnSnapshot};

/// Suggestions shown before the first question of a session.
pub const STARTER_QUESTIONS: [&str; 5] = [
    "What is Lyzr Agent Studio?",
    "How to build AI agents with low-code platforms?",
    "How does RAG improve AI accuracy?",
    "What is AI hallucination?",
    "What are the benefits of multi-agent orchestration?",
];

/// Prints a turn as it streams: plan step transitions, then text deltas.
#[derive(Debug, Default)]
pub struct LiveRenderer {
    printed: usize,
    steps: Vec<StepProgress>,
    text_started: bool,
}

#[derive(Debug, Default, Clone)]
struct StepProgress {
    status: AgentSearchStepStatus,
    queries_shown: bool,
}

impl LiveRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, snapshot: &TurnSnapshot, out: &mut impl Write) -> io::Result<()> {
        if snapshot.phase != TurnPhase::Streaming {
            return Ok(());
        }
        match &snapshot.message {
            Some(message) => self.render_message(message, out),
            None => Ok(()),
        }
    }

    /// Print whatever the last snapshot missed, then the sources and related
    /// questions.
    pub fn finish(&mut self, message: &ChatMessage, out: &mut impl Write) -> io::Result<()> {
        self.render_message(message, out)?;
        if self.text_started {
            writeln!(out)?;
        }
        let footer = render_footer(message);
        if !footer.is_empty() {
            write!(out, "\n{footer}")?;
        }
        out.flush()
    }

    fn render_message(&mut self, message: &ChatMessage, out: &mut impl Write) -> io::Result<()> {
        if let Some(plan) = &message.agent_response {
            self.render_plan(plan, out)?;
        }
        self.render_text(&message.content, out)?;
        out.flush()
    }

    fn render_plan(&mut self, plan: &AgentResponse, out: &mut impl Write) -> io::Result<()> {
        let total = plan.steps_details.len();
        self.steps.resize(total, StepProgress::default());

        for (i, step) in plan.steps_details.iter().enumerate() {
            let seen = &mut self.steps[i];
            if step.status > seen.status {
                let marker = match step.status {
                    AgentSearchStepStatus::Current => "→",
                    AgentSearchStepStatus::Done => "✓",
                    AgentSearchStepStatus::Default => continue,
                };
                writeln!(out, "{marker} [{}/{total}] {}", i + 1, step.step)?;
                seen.status = step.status;
            }
            if !seen.queries_shown && !step.queries.is_empty() {
                writeln!(out, "    searching: {}", step.queries.join("; "))?;
                seen.queries_shown = true;
            }
        }
        Ok(())
    }

    fn render_text(&mut self, content: &str, out: &mut impl Write) -> io::Result<()> {
        if content.len() < self.printed || !content.is_char_boundary(self.printed) {
            // Content only grows within a turn
            self.printed = 0;
        }
        let delta = &content[self.printed..];
        if delta.is_empty() {
            return Ok(());
        }
        if !self.text_started && !self.steps.is_empty() {
            writeln!(out)?;
        }
        self.text_started = true;
        write!(out, "{delta}")?;
        self.printed = content.len();
        Ok(())
    }
}

/// Answer text with every citation marker resolved to `[n](url)`.
///
/// Markers past the end of the sources stay as bare `[n]`.
pub fn render_answer(message: &ChatMessage) -> String {
    replace_citations(&message.content, &message.sources, |citation| {
        let href = citation.href();
        if href.is_empty() {
            format!("[{}]", citation.number)
        } else {
            format!("[{}]({href})", citation.number)
        }
    })
}

/// Numbered sources and related questions. Empty when there are neither.
pub fn render_footer(message: &ChatMessage) -> String {
    let mut footer = String::new();
    if !message.sources.is_empty() {
        footer.push_str("Sources:\n");
        for (i, source) in message.sources.iter().enumerate() {
            let title = if source.title.is_empty() {
                source.url.as_str()
            } else {
                source.title.as_str()
            };
            footer.push_str(&format!("  [{}] {title} - {}\n", i + 1, source.url));
        }
    }
    if !message.related_queries.is_empty() {
        if !footer.is_empty() {
            footer.push('\n');
        }
        footer.push_str("Related:\n");
        footer.push_str(&numbered(&message.related_queries));
    }
    footer
}

/// `  1. first` style list.
pub fn numbered<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("  {}. {}\n", i + 1, item.as_ref()))
        .collect()
}

/// Resolve a 1-based menu choice typed by the user.
pub fn resolve_choice<'a, S: AsRef<str>>(input: &str, options: &'a [S]) -> Option<&'a str> {
    let n: usize = input.trim().parse().ok()?;
    options.get(n.checked_sub(1)?).map(AsRef::as_ref)
}

/// Parse `/dates` arguments: nothing clears the filter, otherwise
/// `START [END]` with `-` for an open side.
pub fn parse_date_args(args: &str) -> Result<DateRange, String> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() > 2 {
        return Err("usage: /dates [START|-] [END|-]".into());
    }
    let parse = |part: Option<&&str>| -> Result<Option<NaiveDate>, String> {
        match part {
            None | Some(&"-") => Ok(None),
            Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Some)
                .map_err(|e| format!("invalid date '{s}': {e}")),
        }
    };
    let range = DateRange::new(parse(parts.first())?, parse(parts.get(1))?);
    check_date_range(&range)?;
    Ok(range)
}

pub fn check_date_range(range: &DateRange) -> Result<(), String> {
    match (range.start, range.end) {
        (Some(start), Some(end)) if start > end => {
            Err(format!("start date {start} is after end date {end}"))
        }
        _ => Ok(()),
    }
}
