//! Error type shared by the bias audit crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem failure while reading or writing a config file
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A config file is malformed or holds an out-of-range value
    #[error("Invalid configuration: {0}")]
    Config(String),
}
