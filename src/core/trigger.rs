//! Trigger events and the predicates pipelines match them against

use regex::Regex;
use serde::{Deserialize, Serialize};

fn default_kind() -> String {
    "push".to_string()
}

/// An external event that may start a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Repository the event originated from
    pub repository: String,

    /// Branch the event refers to
    pub branch: String,

    /// Commit hash
    pub commit: String,

    /// Identity that caused the event
    pub actor: String,

    /// Event kind, e.g. "push" or "manual"
    #[serde(default = "default_kind")]
    pub kind: String,
}

impl TriggerEvent {
    /// Create a push event
    pub fn push(
        repository: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            commit: commit.into(),
            actor: actor.into(),
            kind: default_kind(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

/// Pattern for matching a branch or repository name
///
/// Written in configuration as a plain name (`main`), a glob using `*`
/// (`release/*`), or a regular expression prefixed with `regex:`.
#[derive(Debug, Clone)]
pub enum NamePattern {
    /// Matches anything
    Any,
    /// Exact string match
    Exact(String),
    /// Compiled glob or regular expression
    Regex { source: String, regex: Regex },
}

impl NamePattern {
    /// Compile a pattern from its configuration form
    pub fn parse(source: &str) -> Result<Self, regex::Error> {
        if source == "*" {
            return Ok(NamePattern::Any);
        }

        if let Some(expr) = source.strip_prefix("regex:") {
            let regex = Regex::new(expr)?;
            return Ok(NamePattern::Regex {
                source: source.to_string(),
                regex,
            });
        }

        if source.contains('*') {
            let escaped: Vec<String> = source.split('*').map(regex::escape).collect();
            let regex = Regex::new(&format!("^{}$", escaped.join(".*")))?;
            return Ok(NamePattern::Regex {
                source: source.to_string(),
                regex,
            });
        }

        Ok(NamePattern::Exact(source.to_string()))
    }

    /// Check if the pattern matches the given name
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Any => true,
            NamePattern::Exact(expected) => expected == name,
            NamePattern::Regex { regex, .. } => regex.is_match(name),
        }
    }

    /// The configuration form of the pattern
    pub fn source(&self) -> &str {
        match self {
            NamePattern::Any => "*",
            NamePattern::Exact(s) => s,
            NamePattern::Regex { source, .. } => source,
        }
    }
}

/// Predicate deciding whether an event starts a pipeline run
#[derive(Debug, Clone)]
pub struct TriggerPredicate {
    pub repository: NamePattern,
    pub branch: NamePattern,
    /// Accepted event kinds
    pub events: Vec<String>,
}

impl TriggerPredicate {
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        self.events.iter().any(|kind| kind == &event.kind)
            && self.repository.matches(&event.repository)
            && self.branch.matches(&event.branch)
    }

    /// Canonical form used to enforce one active pipeline per trigger configuration
    pub fn key(&self) -> String {
        let mut events = self.events.clone();
        events.sort();
        events.dedup();
        format!(
            "repository={};branch={};events={}",
            self.repository.source(),
            self.branch.source(),
            events.join(",")
        )
    }
}
