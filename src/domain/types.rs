//! Strongly typed domain primitives for workflow runs.
//!
//! These newtypes provide type safety for identifiers, commit hashes and branch
//! names. Validating constructors reject malformed input so the rest of the
//! domain can assume well-formed values.

use crate::domain::errors::WorkflowError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parses an identifier from its string form.
            pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
            }

            /// First eight characters, for directory and branch names.
            pub fn short(&self) -> String {
                self.0.simple().to_string().chars().take(8).collect()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a workflow run (the aggregate id).
    WorkflowRunId
);
uuid_id!(
    /// Identifier of a work execution (one per started pipeline step).
    WorkExecutionId
);
uuid_id!(
    /// Identifier of a task execution inside a work execution.
    TaskExecutionId
);
uuid_id!(ReportId);
uuid_id!(CheckpointId);
uuid_id!(WorkTreeId);
uuid_id!(WorkflowSpaceId);
uuid_id!(WorkSpaceId);

string_id!(
    /// Identifier of the workflow definition a run was created from.
    WorkflowId
);
string_id!(
    /// Identifier of an external git repository record.
    GitId
);
string_id!(
    /// Identifier of an external MCP server record.
    McpServerId
);
string_id!(
    /// Issue tracker key the run works on (e.g. `PROJ-123`).
    IssueKey
);

/// A full 40 character hexadecimal git commit hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitHash(String);

fn commit_hash_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-f]{40}$").expect("static regex"))
}

impl CommitHash {
    /// Parses a commit hash, normalising to lowercase.
    pub fn parse(value: &str) -> Result<Self, WorkflowError> {
        let normalized = value.trim().to_ascii_lowercase();
        if !commit_hash_pattern().is_match(&normalized) {
            return Err(WorkflowError::InvalidConfig {
                message: format!("'{}' is not a 40 character hex commit hash", value),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CommitHash {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CommitHash> for String {
    fn from(hash: CommitHash) -> Self {
        hash.0
    }
}

impl std::fmt::Display for CommitHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A git branch name that satisfies the usual ref-format rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

fn forbidden_branch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\.\.|@\{|//|[\x00-\x20~^:?*\[\\\x7f])").expect("static regex")
    })
}

impl BranchName {
    /// Validates a branch name.
    pub fn parse(value: &str) -> Result<Self, WorkflowError> {
        let invalid = value.is_empty()
            || value.starts_with('/')
            || value.ends_with('/')
            || value.starts_with('-')
            || value.ends_with('.')
            || value.ends_with(".lock")
            || value == "@"
            || forbidden_branch_pattern().is_match(value);
        if invalid {
            return Err(WorkflowError::InvalidConfig {
                message: format!("'{}' is not a valid branch name", value),
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Builds the branch a run uses for one of its work trees:
    /// `runflow/<label>-<run-short>`, where the label is sanitized.
    pub fn for_run(label: &str, run_id: &WorkflowRunId) -> Self {
        let safe_label: String = label
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
            .collect();

        let safe_label = if safe_label.trim_matches('-').is_empty() {
            "run".to_string()
        } else {
            safe_label.trim_matches('-').to_string()
        };

        Self(format!("runflow/{}-{}", safe_label, run_id.short()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BranchName> for String {
    fn from(branch: BranchName) -> Self {
        branch.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UTC timestamp for records and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampUtc(pub DateTime<Utc>);

impl TimestampUtc {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the timestamp as an RFC3339 string.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for TimestampUtc {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
