//! Line-oriented console client commands.

use crate::engine::{CommitReport, ItemOutcome};
use crate::session::SaveOutcome;
use crate::staging::{StagedIntent, ToggleOutcome};
use gift_registry_core::item::ItemId;
use std::fmt::Write as _;
use std::str::FromStr;
use thiserror::Error;

/// Help text listing every command.
pub const HELP: &str = "\
Commands:
  list           show the registry
  toggle <id>    mark or unmark an item (staged until you save)
  save           commit your staged changes
  staged         show staged changes
  metrics        print Prometheus metrics
  help           show this help
  quit           leave";

/// A parsed console command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Render the grouped registry
    List,
    /// Toggle one item
    Toggle(ItemId),
    /// Run a commit pass
    Save,
    /// Show staged intents
    Staged,
    /// Render metrics
    Metrics,
    /// Show help
    Help,
    /// Leave the client
    Quit,
}

/// Console input that is not a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseCommandError {
    /// Blank line
    #[error("empty command")]
    Empty,
    /// `toggle` without an id
    #[error("usage: toggle <id>")]
    MissingId,
    /// Unrecognised word
    #[error("unknown command '{0}', type 'help'")]
    Unknown(String),
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ParseCommandError::Empty);
        };

        match verb.to_ascii_lowercase().as_str() {
            "list" | "ls" => Ok(Self::List),
            "toggle" | "t" => words
                .next()
                .map(|id| Self::Toggle(ItemId::new(id)))
                .ok_or(ParseCommandError::MissingId),
            "save" => Ok(Self::Save),
            "staged" => Ok(Self::Staged),
            "metrics" => Ok(Self::Metrics),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

/// Message for a toggle result.
#[must_use]
pub fn describe_toggle(id: &ItemId, outcome: &ToggleOutcome) -> String {
    match outcome {
        ToggleOutcome::Staged { checked: true } => format!("{id} marked (save to confirm)"),
        ToggleOutcome::Staged { checked: false } => format!("{id} unmarked (save to confirm)"),
        ToggleOutcome::Rejected { .. } => {
            format!("{id} is already reserved by another guest")
        },
    }
}

/// Acknowledgment for a save result.
#[must_use]
pub fn describe_save(outcome: &SaveOutcome) -> String {
    match outcome {
        SaveOutcome::NothingToSave => "nothing to save".to_string(),
        SaveOutcome::Completed(report) => describe_report(report),
    }
}

fn describe_report(report: &CommitReport) -> String {
    if report.is_success() {
        return "Thank you! Your choices are saved.".to_string();
    }

    let mut message = String::new();
    let conflicts = report.conflicts();
    if !conflicts.is_empty() {
        let ids: Vec<_> = conflicts.iter().map(ItemId::as_str).collect();
        let _ = writeln!(
            message,
            "Someone else reserved these first: {}. The list shows their current state.",
            ids.join(", ")
        );
    }
    for (id, reason) in report.failures() {
        let _ = writeln!(message, "Could not save {id}: {reason}. Please try again.");
    }
    let saved = report
        .items
        .iter()
        .filter(|item| !matches!(item.outcome, ItemOutcome::Unchanged) && item.outcome.is_committed())
        .count();
    if saved > 0 {
        let _ = write!(message, "{saved} other change(s) saved.");
    }
    message.trim_end().to_string()
}

/// Listing of staged intents.
#[must_use]
pub fn describe_staged(staged: &[StagedIntent]) -> String {
    if staged.is_empty() {
        return "nothing staged".to_string();
    }

    staged
        .iter()
        .map(|intent| {
            let verb = if intent.reserve { "reserve" } else { "release" };
            format!("  {verb} {}", intent.id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
