use azurerm_provider::{init_logging, serve, AzureRmProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting azurerm-provider");
    serve(AzureRmProvider::new()).await
}
