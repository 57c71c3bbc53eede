use std::fmt;

/// Outcome of reading a checkpoint document.
///
/// Benign failures (missing file, corrupt JSON, foreign schema) are values,
/// not errors: callers treat them as "nothing stored yet" and carry on.
/// Fatal conditions travel separately in the surrounding `anyhow::Result`.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<T> {
    Present(T),
    Absent(AbsentReason),
}

impl<T> Loaded<T> {
    pub fn present(self) -> Option<T> {
        match self {
            Loaded::Present(value) => Some(value),
            Loaded::Absent(_) => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Loaded::Present(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsentReason {
    Missing,
    Unreadable(String),
    Corrupt(String),
    SchemaMismatch { found: Option<u64>, expected: u32 },
    DirectoryMismatch { recorded: String, expected: String },
    SourceMismatch { recorded: String, expected: String },
    InvalidReference(String),
    AlreadyCompleted,
}

impl AbsentReason {
    /// Short kebab-case tag used in warning lines.
    pub fn tag(&self) -> &'static str {
        match self {
            AbsentReason::Missing => "missing",
            AbsentReason::Unreadable(_) => "unreadable",
            AbsentReason::Corrupt(_) => "corrupt",
            AbsentReason::SchemaMismatch { .. } => "schema-mismatch",
            AbsentReason::DirectoryMismatch { .. } => "directory-mismatch",
            AbsentReason::SourceMismatch { .. } => "source-mismatch",
            AbsentReason::InvalidReference(_) => "invalid-reference",
            AbsentReason::AlreadyCompleted => "already-completed",
        }
    }
}

impl fmt::Display for AbsentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbsentReason::Missing => write!(f, "no record on disk"),
            AbsentReason::Unreadable(err) => write!(f, "record unreadable: {err}"),
            AbsentReason::Corrupt(err) => write!(f, "record corrupt: {err}"),
            AbsentReason::SchemaMismatch { found, expected } => match found {
                Some(found) => write!(f, "schema version {found} != {expected}"),
                None => write!(f, "schema version missing, expected {expected}"),
            },
            AbsentReason::DirectoryMismatch { recorded, expected } => {
                write!(f, "record belongs to {recorded}, not {expected}")
            }
            AbsentReason::SourceMismatch { recorded, expected } => {
                write!(f, "record describes {recorded}, not {expected}")
            }
            AbsentReason::InvalidReference(reference) => {
                write!(f, "invalid result reference {reference}")
            }
            AbsentReason::AlreadyCompleted => write!(f, "run already completed"),
        }
    }
}
