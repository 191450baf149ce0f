use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValuationError {
    #[error("database error: {0}")]
    Db(#[from] database::DbError),

    #[error("exchange error: {0}")]
    Exchange(#[from] exchange::ExchangeError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
