#![allow(dead_code)]

use std::time::Duration;

use azurerm_provider::testing::ProviderTester;
use azurerm_provider::AzureRmProvider;
use httpmock::{Mock, MockServer};
use serde_json::json;

pub const SUBSCRIPTION: &str = "11111111-2222-3333-4444-555555555555";
pub const TOKEN: &str = "test-token";

/// A provider configured against `server` with a static token and fast polling.
pub async fn configured(server: &MockServer) -> ProviderTester<AzureRmProvider> {
    let tester = ProviderTester::new(AzureRmProvider::with_env_lookup(|_| None));
    tester
        .configure(json!({
            "subscription_id": SUBSCRIPTION,
            "access_token": TOKEN,
            "resource_manager_endpoint": server.base_url(),
            "operation_poll_interval": "10ms",
        }))
        .await
        .expect("configure against the mock server");
    tester
}

/// Resolve once `mock` has received at least `hits` requests.
pub async fn wait_for_hits(mock: &Mock<'_>, hits: usize) {
    while mock.hits_async().await < hits {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn bearer() -> String {
    format!("Bearer {}", TOKEN)
}
