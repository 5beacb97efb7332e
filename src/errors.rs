use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LatchkeyError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(latchkey::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(latchkey::config))]
    Config(#[from] config::ConfigError),

    #[error("{0}")]
    #[diagnostic(code(latchkey::other))]
    Other(String),
}
