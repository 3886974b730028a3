//! Error types for requirement parsing and validation.

use thiserror::Error;

use crate::requirement::Operator;

/// Syntax errors for a single requirement line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line has no package name.
    #[error("requirement has no package name")]
    EmptyName,

    /// The package name contains characters outside `[A-Za-z0-9._-]` or
    /// does not start and end with an alphanumeric character.
    #[error("invalid package name '{0}'")]
    InvalidName(String),

    /// An extras list was opened with `[` but never closed.
    #[error("unterminated extras list")]
    UnterminatedExtras,

    /// An entry inside the extras list is not a valid name.
    #[error("invalid extra '{0}'")]
    InvalidExtra(String),

    /// A version clause does not start with a comparison operator.
    #[error("expected a version operator in '{0}'")]
    MissingOperator(String),

    /// An operator is not followed by a version.
    #[error("operator '{0}' is missing a version")]
    MissingVersion(Operator),

    /// The version contains characters that cannot appear in a version.
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// A direct reference (`name @ url`) without the url.
    #[error("direct reference is missing a url")]
    MissingUrl,

    /// A direct reference whose url has no scheme, no host, or contains
    /// whitespace.
    #[error("invalid direct reference url '{0}'")]
    InvalidUrl(String),

    /// A marker separator with nothing after it.
    #[error("environment marker is empty")]
    EmptyMarker,

    /// The text after `;` does not follow the environment marker grammar.
    #[error("invalid environment marker '{marker}': {reason}")]
    InvalidMarker {
        marker: String,
        reason: &'static str,
    },
}

/// Validation errors for a whole requirement list.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequirementError {
    /// A line failed to parse.
    #[error("invalid requirement '{entry}': {source}")]
    Malformed {
        entry: String,
        #[source]
        source: ParseError,
    },

    /// No line names the runtime.
    #[error("a pinned runtime version is required")]
    MissingRuntimePin,

    /// More than one line names the runtime.
    #[error("only one runtime pin is allowed, found '{first}' and '{second}'")]
    MultipleRuntimePins { first: String, second: String },

    /// The runtime line has no version specifier at all.
    #[error("runtime requirement '{entry}' must pin an exact version with '=='")]
    RuntimeUnpinned { entry: String },

    /// The runtime line has more than one version specifier.
    #[error("runtime requirement '{entry}' must carry exactly one version specifier")]
    RuntimeMultipleSpecifiers { entry: String },

    /// The runtime line uses something other than `==`.
    #[error("runtime requirement '{entry}' must use '==', not '{operator}'")]
    RuntimeOperator { entry: String, operator: Operator },

    /// The runtime line uses a `==X.*` prefix match.
    #[error("runtime requirement '{entry}' must name an exact version, not a wildcard")]
    RuntimeWildcard { entry: String },
}

impl RequirementError {
    /// Returns true if the error concerns the runtime pin rather than the
    /// syntax of a line.
    pub fn is_runtime_error(&self) -> bool {
        !matches!(self, RequirementError::Malformed { .. })
    }
}
