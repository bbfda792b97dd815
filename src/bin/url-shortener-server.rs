use anyhow::Context;
use rearch::Container;
use tokio::net::TcpListener;
use tracing::info;
use url_shortener::{
    api,
    config::{self, addr_capsule, environment_capsule, request_timeout_capsule},
    logging,
    url_service::url_registration_service_capsule,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let container = Container::new();
    logging::init(container.read(environment_capsule));
    info!("URL shortener starting");

    config::init_storage(&container)
        .await
        .context("Failed to initialize storage")?;

    let (url_service, request_timeout) =
        container.read((url_registration_service_capsule, request_timeout_capsule));
    let app = api::app(url_service, request_timeout);

    let listener = TcpListener::bind(container.read(addr_capsule)).await?;
    info!(addr = %listener.local_addr()?, "Started listening on TCP");
    axum::serve(listener, app).await?;

    info!("Server stopped");
    Ok(())
}
