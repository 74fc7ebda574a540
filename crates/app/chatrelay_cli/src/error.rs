use thiserror::Error;

pub type Result<T> = core::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{}", .0)]
    Custom(String),

    /// The server answered with an error envelope.
    #[error("{code}: {message} (retryable: {retryable}, request {request_id})")]
    Server {
        status: u16,
        code: String,
        message: String,
        retryable: bool,
        request_id: String,
    },

    #[error("IO::{:?}: {}", .0, .0)]
    Io(#[from] std::io::Error),

    #[error("Http: {}", .0)]
    Http(#[from] reqwest::Error),

    #[error("Json: {}", .0)]
    Json(#[from] serde_json::Error),

    #[error("FlexiLogger::{:?}: {}", .0, .0)]
    FlexiLogger(#[from] flexi_logger::FlexiLoggerError),
}
