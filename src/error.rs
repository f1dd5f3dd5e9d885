//! Error types for policy resolution.
//!
//! All errors are strongly typed using thiserror. Validation errors describe
//! structural problems in a Policy (or a Policy/manifest drift), Hub errors
//! wrap failures reported by the Hub collaborator.

use std::fmt;

use thiserror::Error;

use crate::hub::HubError;

/// The kind of TypeInstance referenced from a Policy `inject` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeInstanceKind {
    /// Entry of `inject.requiredTypeInstances`.
    Required,
    /// Entry of `inject.additionalTypeInstances`.
    Additional,
}

impl fmt::Display for TypeInstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "RequiredTypeInstance"),
            Self::Additional => write!(f, "AdditionalTypeInstance"),
        }
    }
}

/// A single problem found while validating a group of Policy entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Name or ID of the offending entry.
    pub subject: String,
    /// Human readable description.
    pub message: String,
}

impl Issue {
    /// Creates a new issue.
    #[must_use]
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
        }
    }
}

/// An aggregated list of issues, rendered as one multi-line message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueList(Vec<Issue>);

impl IssueList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an issue.
    pub fn push(&mut self, issue: Issue) {
        self.0.push(issue);
    }

    /// Returns true if nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of reported issues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the reported issues.
    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.0.iter()
    }
}

impl FromIterator<Issue> for IssueList {
    fn from_iter<I: IntoIterator<Item = Issue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for IssueList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.0.len() == 1 { "error" } else { "errors" };
        write!(f, "{} {noun} occurred:", self.0.len())?;
        for issue in &self.0 {
            write!(f, "\n\t* {:?}: {}", issue.subject, issue.message)?;
        }
        Ok(())
    }
}

/// Validation errors for Policies and injection directives.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing Type reference for {kind} {id:?}")]
    MissingTypeRef {
        kind: TypeInstanceKind,
        id: String,
    },

    #[error("while validating TypeInstance metadata for Policy: {issues}")]
    UnresolvedTypeInstanceMetadata {
        issues: IssueList,
    },

    #[error("while checking if additional TypeInstances from Policy are defined in Implementation {implementation:?}: {issues}")]
    UndefinedAdditionalTypeInstances {
        implementation: String,
        issues: IssueList,
    },

    #[error("found duplicated alias {alias:?} entry under requires property")]
    DuplicatedAlias {
        alias: String,
    },

    #[error("unsupported Policy API version {version:?}: expected {supported}")]
    UnsupportedApiVersion {
        version: String,
        supported: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid Policy document: {reason}")]
    InvalidDocument {
        reason: String,
    },

    #[error("Action reference {reference:?} doesn't follow pattern <import_alias>.<method_name>")]
    MalformedActionReference {
        reference: String,
    },

    #[error("Full path not found in Implementation imports for action {reference:?}")]
    ActionImportNotFound {
        reference: String,
    },

    #[error("Interface alias {alias:?} in workflow step policy was not resolved against Implementation imports")]
    UnresolvedInterfaceAlias {
        alias: String,
    },
}

/// Top-level error type for the crate.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{context}: {source}")]
    Hub {
        context: &'static str,
        #[source]
        source: HubError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl PolicyError {
    /// Wraps a Hub error with a short static context.
    #[must_use]
    pub fn hub(context: &'static str, source: HubError) -> Self {
        Self::Hub { context, source }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error was reported by the Hub.
    #[must_use]
    pub const fn is_hub(&self) -> bool {
        matches!(self, Self::Hub { .. })
    }

    /// Returns true if this is an I/O error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
