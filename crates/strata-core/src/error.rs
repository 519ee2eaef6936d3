use crate::{
    adapter::{AdapterError, CoerceError},
    cast::CastError,
    config::ConfigError,
    db::{
        query::plan::{PlanError, QueryError},
        registry::RegistryError,
    },
};
use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable internal classification.
/// Every domain error in the crate converts into this shape so callers can
/// branch on `class`/`origin` without matching each domain enum.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl InternalError {
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
        }
    }

    /// Construct a planner-origin failure.
    pub(crate) fn planning(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Planning, ErrorOrigin::Planner, message)
    }

    /// Construct an adapter-origin contract violation.
    pub(crate) fn adapter_contract(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Adapter,
            message,
        )
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.class, ErrorClass::NotFound)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

impl From<AdapterError> for InternalError {
    fn from(err: AdapterError) -> Self {
        let class = match &err {
            AdapterError::Startup { .. } | AdapterError::Init { .. } => ErrorClass::Startup,
            AdapterError::MissingLoader { .. } | AdapterError::MissingDumper { .. } => {
                return Self::adapter_contract(err.to_string());
            }
            AdapterError::UnsupportedAutogenerate { .. } => ErrorClass::Unsupported,
            AdapterError::Timeout { .. } | AdapterError::Backend { .. } => ErrorClass::Internal,
        };

        Self::new(class, ErrorOrigin::Adapter, err.to_string())
    }
}

impl From<RegistryError> for InternalError {
    fn from(err: RegistryError) -> Self {
        let class = match &err {
            RegistryError::NotStarted(_) => ErrorClass::NotFound,
            RegistryError::AlreadyStarted(_) => ErrorClass::Conflict,
            RegistryError::AdapterMismatch { .. } => ErrorClass::InvariantViolation,
        };

        Self::new(class, ErrorOrigin::Registry, err.to_string())
    }
}

impl From<PlanError> for InternalError {
    fn from(err: PlanError) -> Self {
        Self::planning(err.to_string())
    }
}

impl From<QueryError> for InternalError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Registry(err) => err.into(),
            QueryError::Plan(err) => err.into(),
            QueryError::Adapter(err) => err.into(),
        }
    }
}

impl From<CoerceError> for InternalError {
    fn from(err: CoerceError) -> Self {
        match err {
            CoerceError::Contract(err) => err.into(),
            CoerceError::Cast(err) => err.into(),
        }
    }
}

impl From<CastError> for InternalError {
    fn from(err: CastError) -> Self {
        Self::new(ErrorClass::Planning, ErrorOrigin::Cast, err.to_string())
    }
}

impl From<ConfigError> for InternalError {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorClass::Startup, ErrorOrigin::Config, err.to_string())
    }
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
/// Not a stable API; may change without notice.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Startup,
    Planning,
    NotFound,
    Conflict,
    Unsupported,
    InvariantViolation,
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Startup => "startup",
            Self::Planning => "planning",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unsupported => "unsupported",
            Self::InvariantViolation => "invariant_violation",
            Self::Internal => "internal",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
/// Not a stable API; may change without notice.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Config,
    Adapter,
    Registry,
    Planner,
    Cast,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Config => "config",
            Self::Adapter => "adapter",
            Self::Registry => "registry",
            Self::Planner => "planner",
            Self::Cast => "cast",
        };
        write!(f, "{label}")
    }
}
