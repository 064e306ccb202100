use std::net::{IpAddr, SocketAddr};

use crate::error::{bad_env, AppErr, AppResult};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_WS_PATH: &str = "/ws";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub addr:    SocketAddr,
    pub ws_path: String,
    pub echo:    bool,
}

impl Config {
    /// `RELAY_HOST`, `RELAY_PORT`, `RELAY_WS_PATH`, `RELAY_ECHO`.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host: IpAddr = match get("RELAY_HOST") {
            Some(h) => h.parse().map_err(|e| bad_env("RELAY_HOST", e))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port: u16 = match get("RELAY_PORT") {
            Some(p) => p.parse().map_err(|e| bad_env("RELAY_PORT", e))?,
            None => DEFAULT_PORT,
        };
        let ws_path = get("RELAY_WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.into());
        if !ws_path.starts_with('/') {
            return Err(AppErr::Config(format!("RELAY_WS_PATH must start with '/': {ws_path}")));
        }
        let echo = match get("RELAY_ECHO").as_deref() {
            None => false,
            Some("1" | "true") => true,
            Some("0" | "false") => false,
            Some(other) => return Err(bad_env("RELAY_ECHO", format!("expected true/false, got {other:?}"))),
        };

        Ok(Self { addr: SocketAddr::new(host, port), ws_path, echo })
    }
}
