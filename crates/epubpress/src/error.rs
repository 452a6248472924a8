use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::JobId;

#[derive(Error, Debug)]
pub enum EpubpressError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Classification of a conversion failure, shown to the user next to the
/// failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedInput,
    UnsupportedProtection,
    UnrenderableContent,
    RenderFailure,
    WriteFailure,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MalformedInput => write!(f, "Malformed input"),
            ErrorKind::UnsupportedProtection => write!(f, "Unsupported protection"),
            ErrorKind::UnrenderableContent => write!(f, "Unrenderable content"),
            ErrorKind::RenderFailure => write!(f, "Render failure"),
            ErrorKind::WriteFailure => write!(f, "Write failure"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Errors raised while converting a single EPUB. All of them are scoped to
/// one job; `UnrenderableContent` is additionally scoped to one chapter.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Malformed EPUB: {0}")]
    MalformedInput(String),

    #[error("EPUB is protected and cannot be read: {0}")]
    UnsupportedProtection(String),

    #[error("Chapter cannot be rendered: {0}")]
    UnrenderableContent(String),

    #[error("PDF rendering failed: {0}")]
    RenderFailure(String),

    #[error("Failed to write '{path}': {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion cancelled")]
    Cancelled,
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::MalformedInput(_) => ErrorKind::MalformedInput,
            ConversionError::UnsupportedProtection(_) => ErrorKind::UnsupportedProtection,
            ConversionError::UnrenderableContent(_) => ErrorKind::UnrenderableContent,
            ConversionError::RenderFailure(_) => ErrorKind::RenderFailure,
            ConversionError::WriteFailure { .. } => ErrorKind::WriteFailure,
            ConversionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        ConversionError::MalformedInput(message.into())
    }

    pub(crate) fn render(message: impl Into<String>) -> Self {
        ConversionError::RenderFailure(message.into())
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue has been shut down")]
    ShutDown,

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Job {0} has not finished yet")]
    NotTerminal(JobId),

    #[error("Output '{path}' is already targeted by job {existing}")]
    OutputConflict { path: PathBuf, existing: JobId },

    #[error("Invalid source '{path}': {reason}")]
    InvalidSource { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum FontError {
    #[error("Failed to read font '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unusable font: {0}")]
    Parse(String),

    #[error("Font has no Unicode character map")]
    NoUnicodeMap,
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

pub type Result<T> = std::result::Result<T, EpubpressError>;
