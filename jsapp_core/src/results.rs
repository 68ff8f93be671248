//! Results and errors.

use std::path::PathBuf;

// anyhow {

/// [`anyhow::Error`]
pub type AnyErr = anyhow::Error;

/// [`anyhow::Result`] with `T` if ok, [`AnyErr`]([`anyhow::Error`]) if error.
pub type AnyResult<T> = anyhow::Result<T>;

// anyhow }

// std::io {

/// [`std::io::Error`]
pub type IoErr = std::io::Error;

/// [`std::io::ErrorKind`]
pub type IoErrKind = std::io::ErrorKind;

/// [`std::io::Result`] with `T` if ok.
pub type IoResult<T> = std::io::Result<T>;

// std::io }

// thiserror {

/// All error codes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TheErr {
  #[error("Configuration error: {0}")]
  ConfigError(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Already exists: {0}")]
  AlreadyExists(String),

  #[error("Invalid state: {0}")]
  InvalidState(String),

  #[error("Type mismatch: {0}")]
  TypeMismatch(String),

  #[error("Module resolution failed: {0}")]
  ModuleResolution(String),

  #[error("Compile error: {0}")]
  Compile(String),

  #[error("Link error: {0}")]
  Link(String),

  #[error("Evaluation error: {0}")]
  Eval(String),

  #[error("Snapshot io error on {0:?}: {1}")]
  SnapshotIO(PathBuf, String),

  #[error("Corrupt snapshot: {0}")]
  CorruptSnapshot(String),

  #[error("Incompatible snapshot: {0}")]
  IncompatibleSnapshot(String),
}

/// [`Result`] with `T` if ok, [`TheErr`] if error.
pub type TheResult<T> = Result<T, TheErr>;

// thiserror }
