use relay_server::{config::Config, error::AppErr, relay::Relay, routes};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppErr> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg   = Config::from_env()?;
    let relay = Relay::new(cfg.echo);
    let app   = routes::router(&cfg.ws_path, relay);

    let listener = TcpListener::bind(cfg.addr).await?;
    tracing::info!("serving at {}{}", listener.local_addr()?, cfg.ws_path);
    relay_server::serve(listener, app).await
}
