use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("exchange rejected the request (code {code}): {message}")]
    Exchange { code: String, message: String },

    #[error("order rejected (sCode {code}): {message}")]
    OrderRejected { code: String, message: String },

    #[error("failed to deserialize exchange response: {0}")]
    Deserialization(String),

    #[error("invalid data from exchange: {0}")]
    InvalidData(String),

    #[error("no API credentials configured for a private endpoint")]
    MissingCredentials,
}
