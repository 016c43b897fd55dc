//! Line-oriented commands read from stdin while a chapter is open.

use anyhow::{Context, Result, anyhow, bail};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Resume,
    Stop,
    Page(u32),
    Voice(String),
    Rate(f32),
    Pitch(f32),
    Voices,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "commands: play | pause | resume | stop | page N | voice ID | rate X | \
pitch X | voices | status | help | quit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();
    if parts.next().is_some() {
        bail!("Too many arguments for `{verb}`");
    }

    let command = match (verb.to_ascii_lowercase().as_str(), arg) {
        ("play" | "p", None) => Command::Play,
        ("pause", None) => Command::Pause,
        ("resume" | "r", None) => Command::Resume,
        ("stop" | "s", None) => Command::Stop,
        ("voices", None) => Command::Voices,
        ("status", None) => Command::Status,
        ("help" | "?", None) => Command::Help,
        ("quit" | "q" | "exit", None) => Command::Quit,
        ("page", Some(value)) => Command::Page(
            value
                .parse()
                .with_context(|| format!("Invalid page number: {value}"))?,
        ),
        ("voice", Some(value)) => Command::Voice(value.to_string()),
        ("rate", Some(value)) => Command::Rate(parse_float(value)?),
        ("pitch", Some(value)) => Command::Pitch(parse_float(value)?),
        ("page" | "voice" | "rate" | "pitch", None) => bail!("`{verb}` needs a value"),
        (_, Some(_)) if is_known(verb) => bail!("`{verb}` takes no value"),
        _ => return Err(anyhow!("Unknown command `{verb}`; {HELP}")),
    };
    Ok(Some(command))
}

fn is_known(verb: &str) -> bool {
    matches!(
        verb.to_ascii_lowercase().as_str(),
        "play" | "p" | "pause" | "resume" | "r" | "stop" | "s" | "voices" | "status" | "help"
            | "?" | "quit" | "q" | "exit"
    )
}

fn parse_float(value: &str) -> Result<f32> {
    let parsed: f32 = value
        .parse()
        .with_context(|| format!("Invalid number: {value}"))?;
    if !parsed.is_finite() {
        bail!("Invalid number: {value}");
    }
    Ok(parsed)
}
