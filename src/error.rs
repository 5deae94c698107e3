use std::io::{self, Write};
use std::path::PathBuf;

use colored::Colorize;

#[derive(Debug, thiserror::Error)]
pub enum TestMachineError {
    #[error("No token provided. Use --token, set TM_TOKEN_KEY, or run `testmachine config set --api-token <token>`.")]
    MissingToken,

    #[error("--timeout must be a finite number of seconds greater than 0")]
    InvalidTimeout,

    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("File does not exist: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Invalid action: [{action}] must be in [{}].", .allowed.join(", "))]
    InvalidAction {
        action: String,
        allowed: &'static [&'static str],
    },

    #[error("Invalid tool: {}", .0.join(","))]
    InvalidTool(Vec<String>),

    #[error("Response status code: {status}")]
    HttpStatus { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{0}")]
    Report(String),

    #[error("{0}")]
    ConflictingFlags(String),

    #[error("nothing to update: provide --api-token/--base-url/--default-tools")]
    NothingToUpdate,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unable to create zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("unable to read directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TestMachineError>;

const BANNER: &str = "=====================\n       ERROR\n=====================";

/// Writes the failure banner followed by the error details.
///
/// HTTP failures print the status code and the raw response body, every other
/// error prints its message.
pub fn report(err: &TestMachineError, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\n{}", BANNER.red())?;
    match err {
        TestMachineError::HttpStatus { status, body } => {
            writeln!(out, "Response status code: {status}")?;
            writeln!(out, "Error: {body}")?;
        }
        other => writeln!(out, "{other}")?,
    }
    Ok(())
}
