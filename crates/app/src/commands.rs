use std::fmt;

use serde_json::Value;
use unitflow_core::Pace;
use unitflow_core::model::{StepData, TransitionEvent};

/// One line typed at the driver prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Finish the active page, optionally raising named signals.
    Next { signals: Vec<String>, pace: Option<Pace> },
    Back,
    /// Page-requested jump, delayed like feedback.
    Jump(u32),
    /// Navigation chrome jump, immediate.
    Goto(u32),
    /// Finish the active page and mark the unit complete if it is the last one.
    Complete,
    Alternate,
    Activity(String),
    Set(StepData),
    Status,
    Units,
    Restart,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Empty,
    Unknown(String),
    MissingArgument { command: &'static str },
    InvalidPage { raw: String },
    InvalidPace { raw: String },
    InvalidAssignment { raw: String },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Empty => write!(f, "empty command"),
            CommandError::Unknown(cmd) => write!(f, "unknown command: {cmd} (try `help`)"),
            CommandError::MissingArgument { command } => write!(f, "{command} requires an argument"),
            CommandError::InvalidPage { raw } => write!(f, "invalid page number: {raw}"),
            CommandError::InvalidPace { raw } => write!(f, "invalid pace: {raw}"),
            CommandError::InvalidAssignment { raw } => {
                write!(f, "expected key=value, got: {raw}")
            }
        }
    }
}

impl std::error::Error for CommandError {}

pub const HELP: &str = "\
commands:
  next [signal ...] [--pace immediate|feedback|success|celebrate]
  back
  jump <page>       page-requested jump
  goto <page>       chrome jump, immediate
  complete          finish the unit on its last page
  alt               take the alternate branch
  activity <id>     record a finished activity and advance
  set key=value ... merge step data (values are JSON, else strings)
  status
  units
  restart
  quit";

impl Command {
    /// Parse one input line.
    ///
    /// # Errors
    ///
    /// Returns `CommandError` for blank, unknown or malformed commands.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let head = words.next().ok_or(CommandError::Empty)?;
        match head {
            "next" | "n" => parse_next(words),
            "back" | "b" => Ok(Self::Back),
            "jump" => Ok(Self::Jump(page_arg(words.next(), "jump")?)),
            "goto" | "g" => Ok(Self::Goto(page_arg(words.next(), "goto")?)),
            "complete" | "done" => Ok(Self::Complete),
            "alt" => Ok(Self::Alternate),
            "activity" => words
                .next()
                .map(|id| Self::Activity(id.to_owned()))
                .ok_or(CommandError::MissingArgument { command: "activity" }),
            "set" => parse_set(words),
            "status" | "s" => Ok(Self::Status),
            "units" => Ok(Self::Units),
            "restart" => Ok(Self::Restart),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_owned())),
        }
    }

    /// Completion event for the active page, if this command produces one.
    #[must_use]
    pub fn into_event(self, page: u32) -> Option<TransitionEvent> {
        let event = match self {
            Self::Next { signals, pace } => {
                let event = signals
                    .into_iter()
                    .fold(TransitionEvent::advance(page), |event, signal| event.with_signal(signal));
                match pace {
                    Some(pace) => event.paced(pace),
                    None => event,
                }
            }
            Self::Back => TransitionEvent::back(page),
            Self::Jump(target) => TransitionEvent::jump(page, target),
            Self::Complete => TransitionEvent::advance(page).completing(),
            Self::Alternate => TransitionEvent::advance(page).alternate(),
            Self::Activity(id) => TransitionEvent::advance(page).with_activity(id.as_str()),
            _ => return None,
        };
        Some(event)
    }
}

fn parse_next<'a>(mut words: impl Iterator<Item = &'a str>) -> Result<Command, CommandError> {
    let mut signals = Vec::new();
    let mut pace = None;
    while let Some(word) = words.next() {
        if word == "--pace" {
            let raw = words
                .next()
                .ok_or(CommandError::MissingArgument { command: "--pace" })?;
            pace = Some(parse_pace(raw)?);
        } else {
            signals.push(word.to_owned());
        }
    }
    Ok(Command::Next { signals, pace })
}

fn parse_pace(raw: &str) -> Result<Pace, CommandError> {
    serde_json::from_value(Value::String(raw.to_owned()))
        .map_err(|_| CommandError::InvalidPace { raw: raw.to_owned() })
}

fn page_arg(raw: Option<&str>, command: &'static str) -> Result<u32, CommandError> {
    let raw = raw.ok_or(CommandError::MissingArgument { command })?;
    raw.parse()
        .map_err(|_| CommandError::InvalidPage { raw: raw.to_owned() })
}

fn parse_set<'a>(words: impl Iterator<Item = &'a str>) -> Result<Command, CommandError> {
    let mut patch = StepData::new();
    for word in words {
        let (key, raw) = word
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| CommandError::InvalidAssignment { raw: word.to_owned() })?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        patch.insert(key, value);
    }
    if patch.is_empty() {
        return Err(CommandError::MissingArgument { command: "set" });
    }
    Ok(Command::Set(patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitflow_core::model::TransitionRequest;

    #[test]
    fn parses_signals_and_pace() {
        let cmd = Command::parse("next skippedSurvey --pace celebrate").unwrap();
        assert_eq!(
            cmd,
            Command::Next {
                signals: vec!["skippedSurvey".into()],
                pace: Some(Pace::Celebrate),
            }
        );

        let event = cmd.into_event(2).unwrap();
        assert_eq!(event.page, 2);
        assert!(event.has_signal("skippedSurvey"));
        assert_eq!(event.pace, Some(Pace::Celebrate));
    }

    #[test]
    fn page_numbers_are_validated() {
        assert_eq!(Command::parse("goto 4").unwrap(), Command::Goto(4));
        assert!(matches!(
            Command::parse("jump four"),
            Err(CommandError::InvalidPage { .. })
        ));
        assert!(matches!(
            Command::parse("jump"),
            Err(CommandError::MissingArgument { command: "jump" })
        ));
    }

    #[test]
    fn set_reads_json_values_and_falls_back_to_strings() {
        let Command::Set(patch) = Command::parse("set quizPassed=false name=Ada score=3").unwrap()
        else {
            panic!("expected set");
        };
        assert_eq!(patch.get_as::<bool>("quizPassed"), Some(false));
        assert_eq!(patch.get_as::<String>("name").as_deref(), Some("Ada"));
        assert_eq!(patch.get_as::<u32>("score"), Some(3));

        assert!(matches!(
            Command::parse("set =1"),
            Err(CommandError::InvalidAssignment { .. })
        ));
    }

    #[test]
    fn chrome_commands_carry_no_event() {
        assert_eq!(Command::parse("status").unwrap().into_event(1), None);
        assert_eq!(Command::parse("goto 2").unwrap().into_event(1), None);
        let back = Command::parse("b").unwrap().into_event(3).unwrap();
        assert_eq!(back.request, TransitionRequest::Back);
    }

    #[test]
    fn blank_and_unknown_lines_are_rejected() {
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
        assert_eq!(
            Command::parse("dance"),
            Err(CommandError::Unknown("dance".into()))
        );
    }
}
