use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Bootstrap template not found: {0}")]
    TemplateNotFound(String),

    #[error("Bootstrap template '{name}' is invalid: {message}")]
    InvalidTemplate { name: String, message: String },

    #[error("Failed to render bootstrap template '{name}': {message}")]
    RenderError { name: String, message: String },

    #[error("IO error: {path}\nreason: {message}")]
    Io { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
