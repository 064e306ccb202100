use std::fmt::Display;

pub type AppResult<T> = Result<T, AppErr>;

/* ── startup: config + listener ── */
#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

/* ── one recipient could not be reached ── */
#[derive(thiserror::Error, Debug)]
pub enum SendErr {
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("outbox closed")]
    Gone,

    #[error("outbox full")]
    Full,
}

/* ── why a connection's receive loop ended ── */
#[derive(thiserror::Error, Debug)]
pub enum LinkErr {
    #[error("replay failed: {0}")]
    Replay(#[from] SendErr),

    #[error("bad payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("transport: {0}")]
    Transport(#[from] axum::Error),

    #[error("closed with code {0}")]
    Abnormal(u16),

    #[error("stream ended without a close frame")]
    Dropped,

    #[error("closed by relay after a failed send")]
    Evicted,
}

/* ── helper: unparsable env var ⇒ Config ── */
pub fn bad_env<E: Display>(key: &str, e: E) -> AppErr {
    AppErr::Config(format!("{key}: {e}"))
}
