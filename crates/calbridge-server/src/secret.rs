//! Credential values that live outside `config.toml`.
//!
//! `pass::google/calendar-secret` reads the first line of a `pass` entry,
//! `env::GOOGLE_CLIENT_ID` reads an environment variable. Any other value
//! is a literal.

use std::io;
use std::process::{Command, ExitStatus};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("environment variable `{0}` is not set")]
    MissingEnv(String),

    #[error("failed to run `pass show {path}`: {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("`pass show {path}` failed ({status}): {stderr}")]
    Pass {
        path: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("`pass show {0}` produced no output")]
    Empty(String),
}

/// A parsed credential value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretRef<'a> {
    Pass(&'a str),
    Env(&'a str),
    Literal(&'a str),
}

impl<'a> SecretRef<'a> {
    pub fn parse(raw: &'a str) -> Self {
        if let Some(path) = raw.strip_prefix("pass::") {
            Self::Pass(path)
        } else if let Some(var) = raw.strip_prefix("env::") {
            Self::Env(var)
        } else {
            Self::Literal(raw)
        }
    }

    /// True when the value is the secret itself rather than a pointer to it.
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    pub fn resolve(&self) -> Result<String, SecretError> {
        match *self {
            Self::Literal(value) => Ok(value.to_string()),
            Self::Env(var) => std::env::var(var).map_err(|_| SecretError::MissingEnv(var.to_string())),
            Self::Pass(path) => pass_show(path),
        }
    }
}

/// Resolves `raw`, following a reference if it is one.
pub fn resolve(raw: &str) -> Result<String, SecretError> {
    SecretRef::parse(raw).resolve()
}

fn pass_show(path: &str) -> Result<String, SecretError> {
    let output = Command::new("pass")
        .args(["show", path])
        .output()
        .map_err(|source| SecretError::Spawn {
            path: path.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SecretError::Pass {
            path: path.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| SecretError::Empty(path.to_string()))
}
