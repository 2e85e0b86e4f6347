use serde_json::Value;

use crate::{contract::ContractClient, transport::{NetworkError, RequestExecutor}};

/// Every resource the contract server offers, whether or not this machine
/// is entitled to it.
pub async fn get_available_resources<E: RequestExecutor>(
    client: &ContractClient<E>,
) -> Result<Vec<Value>, NetworkError> {
    client.request_resources().await.map_err(|e| e.network)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{
        contract::API_V1_RESOURCES,
        testing::{FakeExecutor, test_context},
        transport::{Headers, Method},
    };

    #[tokio::test]
    async fn returns_resources_unmodified() {
        let (ctx, _) = test_context("jammy", []);
        let client = ContractClient::new(ctx, FakeExecutor::default());
        let resources = json!([
            {"name": "esm-infra", "available": true},
            {"name": "new_resource", "available": false},
        ]);
        client
            .executor()
            .respond(Method::Get, API_V1_RESOURCES, json!({"resources": resources}));

        let got = get_available_resources(&client).await.unwrap();
        assert_eq!(Value::Array(got), resources);
    }

    #[tokio::test]
    async fn network_errors_propagate_unchanged() {
        let (ctx, cache) = test_context("jammy", []);
        let client = ContractClient::new(ctx, FakeExecutor::default());
        let failure = NetworkError::http("http://me/v1/resources", 500, Headers::new(), "oops");
        client
            .executor()
            .fail(Method::Get, API_V1_RESOURCES, failure.clone());

        let err = get_available_resources(&client).await.unwrap_err();
        assert_eq!(err, failure);
        assert!(cache.keys().is_empty());
    }
}
