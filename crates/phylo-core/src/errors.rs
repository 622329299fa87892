//! Structured error types shared across phylo crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`PhyloError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (node names, branch indices, sizes, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the phylo engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum PhyloError {
    /// Graph assembly would introduce a directed cycle.
    #[error("cycle error: {0}")]
    Cycle(ErrorInfo),
    /// Malformed analysis assembly (moves on observed data, bad weights, bad config).
    #[error("configuration error: {0}")]
    Configuration(ErrorInfo),
    /// Non-finite log-density or a value outside a distribution's support.
    #[error("numerical error: {0}")]
    Numerical(ErrorInfo),
    /// Inconsistent event/branch bookkeeping after a structural change.
    #[error("dimension error: {0}")]
    Dimension(ErrorInfo),
    /// Lookup and shape errors on the model graph.
    #[error("graph error: {0}")]
    Graph(ErrorInfo),
    /// Serialization, configuration parsing and artefact I/O errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl PhyloError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            PhyloError::Cycle(info)
            | PhyloError::Configuration(info)
            | PhyloError::Numerical(info)
            | PhyloError::Dimension(info)
            | PhyloError::Graph(info)
            | PhyloError::Serde(info) => info,
        }
    }

    /// Returns whether the error must abort the analysis.
    ///
    /// Numerical errors raised while evaluating a proposal are recovered by
    /// rejecting that proposal; every other family is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PhyloError::Numerical(_))
    }

    /// Adds a context entry to the payload of any family.
    pub fn with_context(self, key: impl Into<String>, value: impl ToString) -> Self {
        match self {
            PhyloError::Cycle(info) => PhyloError::Cycle(info.with_context(key, value)),
            PhyloError::Configuration(info) => {
                PhyloError::Configuration(info.with_context(key, value))
            }
            PhyloError::Numerical(info) => PhyloError::Numerical(info.with_context(key, value)),
            PhyloError::Dimension(info) => PhyloError::Dimension(info.with_context(key, value)),
            PhyloError::Graph(info) => PhyloError::Graph(info.with_context(key, value)),
            PhyloError::Serde(info) => PhyloError::Serde(info.with_context(key, value)),
        }
    }
}
