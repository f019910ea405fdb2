use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification of a diagnosed defect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BugType {
    Linting,
    Syntax,
    Logic,
    TypeError,
    Import,
    Indentation,
}

impl BugType {
    pub const ALL: [BugType; 6] = [
        Self::Linting,
        Self::Syntax,
        Self::Logic,
        Self::TypeError,
        Self::Import,
        Self::Indentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linting => "LINTING",
            Self::Syntax => "SYNTAX",
            Self::Logic => "LOGIC",
            Self::TypeError => "TYPE_ERROR",
            Self::Import => "IMPORT",
            Self::Indentation => "INDENTATION",
        }
    }
}

impl fmt::Display for BugType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BugType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| format!("Invalid bug type: {}", s))
    }
}

/// One diagnosed defect in the target repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub file: String,
    pub line_number: u32,
    pub error_message: String,
    pub bug_type: BugType,
}

impl Failure {
    /// A failure is usable only if its path stays inside the workspace:
    /// non-empty, relative, and free of `..` components.
    pub fn has_safe_path(&self) -> bool {
        let file = self.file.trim();
        if file.is_empty() || file.starts_with('/') || file.starts_with('~') {
            return false;
        }
        !file.split(['/', '\\']).any(|segment| segment == "..")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FixStatus {
    Fixed,
}

/// A remediation that was written and committed.
///
/// `patch` holds the full replacement file while the job runs and is never
/// serialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FixRecord {
    pub file: String,
    pub bug_type: BugType,
    pub line_number: u32,
    pub commit_message: String,
    pub status: FixStatus,
    #[serde(skip)]
    pub patch: Option<String>,
}

impl FixRecord {
    pub fn fixed(failure: &Failure, commit_message: String, patch: String) -> Self {
        Self {
            file: failure.file.clone(),
            bug_type: failure.bug_type,
            line_number: failure.line_number,
            commit_message,
            status: FixStatus::Fixed,
            patch: Some(patch),
        }
    }

    pub fn without_patch(mut self) -> Self {
        self.patch = None;
        self
    }
}
