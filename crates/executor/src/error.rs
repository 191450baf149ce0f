use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("database error: {0}")]
    Db(#[from] database::DbError),

    #[error("exchange error: {0}")]
    Exchange(#[from] exchange::ExchangeError),

    #[error("plan {0} not found")]
    PlanNotFound(i64),

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error("no sellable balance for {0}")]
    InsufficientBalance(String),
}
