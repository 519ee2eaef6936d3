use crate::adapter::Fields;
use std::fmt;

///
/// ConstraintKind
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    Check,
    Exclusion,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unique => "unique",
            Self::ForeignKey => "foreign_key",
            Self::Check => "check",
            Self::Exclusion => "exclusion",
        };
        f.write_str(label)
    }
}

///
/// Constraint
/// One violated storage constraint, reported by name.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub name: String,
}

impl Constraint {
    #[must_use]
    pub fn unique(name: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::Unique,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn foreign_key(name: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::ForeignKey,
            name: name.into(),
        }
    }
}

///
/// WriteOutcome
///
/// Result of a single-row write. `Invalid` and `Stale` are expected,
/// recoverable outcomes; callers branch on them instead of treating them
/// as failures.
///

#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    /// Write applied; carries the requested `returning` fields.
    Ok(Fields),
    /// Storage rejected the write on these constraints.
    Invalid(Vec<Constraint>),
    /// No row matched the filters (optimistic-lock miss).
    Stale,
}

impl WriteOutcome {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }

    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        match self {
            Self::Invalid(constraints) => constraints,
            Self::Ok(_) | Self::Stale => &[],
        }
    }
}

///
/// ConflictAction
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ConflictAction {
    /// Surface the conflict as a constraint violation.
    #[default]
    Raise,
    Nothing,
    ReplaceAll,
    Replace(Vec<String>),
}

///
/// OnConflict
/// Insert policy when a row collides with `target`.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OnConflict {
    pub action: ConflictAction,
    pub target: Vec<String>,
}

impl OnConflict {
    #[must_use]
    pub fn nothing(target: &[&str]) -> Self {
        Self {
            action: ConflictAction::Nothing,
            target: target.iter().map(|field| (*field).to_string()).collect(),
        }
    }

    #[must_use]
    pub fn replace_all(target: &[&str]) -> Self {
        Self {
            action: ConflictAction::ReplaceAll,
            target: target.iter().map(|field| (*field).to_string()).collect(),
        }
    }
}
