//! Error types for envmatrix operations.
//!
//! This module defines [`EnvMatrixError`], the primary error type used
//! throughout the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Resolution failures carry the section, the key being read (when one is
//!   known) and the offending text, so a report localizes the fault
//! - Nothing is retried: resolution is deterministic, so any error means the
//!   configuration itself is invalid
//! - Use `anyhow::Error` (via `EnvMatrixError::Other`) for unexpected errors

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for envmatrix operations.
#[derive(Debug, Error)]
pub enum EnvMatrixError {
    /// No configuration file could be located.
    #[error("Configuration not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// The ini source could not be tokenized.
    #[error("Failed to parse config at {path}:{line}: {message}")]
    ConfigParseError {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A placeholder or lookup has no value and no default.
    #[error("[{section}] {key}: substitution {reference} not found")]
    UndefinedReference {
        section: String,
        key: String,
        reference: String,
    },

    /// A cross-section reference would re-enter a value already being resolved.
    #[error("[{section}] {key}: cyclic reference {reference} (resolving {chain})")]
    CyclicReference {
        section: String,
        key: String,
        reference: String,
        chain: String,
    },

    /// A placeholder is missing a component or uses an unsupported kind.
    #[error("[{section}] {key}: malformed substitution {text}: {message}")]
    MalformedPlaceholder {
        section: String,
        key: String,
        text: String,
        message: String,
    },

    /// A raw value does not parse under its declared type.
    #[error("[{section}] {key}: {message}: {value:?}")]
    TypeMismatch {
        section: String,
        key: String,
        value: String,
        message: String,
    },

    /// A command block ended while a line continuation was still open.
    #[error("line-continuation ends nowhere while resolving for [{section}] {key}")]
    UnterminatedContinuation { section: String, key: String },

    /// Shell-word splitting reached the end of a command inside a quote.
    #[error("[{section}] {key}: no closing quotation in {command:?}")]
    UnterminatedQuote {
        section: String,
        key: String,
        command: String,
    },

    /// A postprocess hook rejected a value.
    #[error("[{section}] {key}: {message}")]
    DeclarationConstraintViolation {
        section: String,
        key: String,
        message: String,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for envmatrix operations.
pub type Result<T> = std::result::Result<T, EnvMatrixError>;
