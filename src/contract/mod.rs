//! Authenticated client for the contract server.
//!
//! Successful responses that represent machine state are written to the
//! cache before they are returned; failures are surfaced as
//! [`ContractApiError`] with the server's error envelope attached.

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::{
    cache::{MACHINE_ID_KEY, MACHINE_TOKEN_KEY, machine_access_key},
    context::Context,
    entitlement::MachineToken,
    transport::{ApiRequest, ApiResponse, Headers, Method, RequestExecutor},
    version::user_agent,
};

mod error;

pub use error::{
    ClientError, ContractApiError, ErrorEnvelope, ErrorInfo, REASON_NEVER_EFFECTIVE,
    REASON_NO_LONGER_EFFECTIVE, REASON_NOT_EFFECTIVE_YET, parse_rfc3339_date,
};

pub const API_V1_CONTEXT_MACHINE_TOKEN: &str = "/v1/context/machines/token";
pub const API_V1_RESOURCES: &str = "/v1/resources";

pub fn contract_machine_route(contract_id: &str, machine_id: &str) -> String {
    format!("/v1/contracts/{contract_id}/context/machines/{machine_id}")
}

pub fn resource_machine_access_route(resource: &str, machine_id: &str) -> String {
    format!("/v1/resources/{resource}/context/machines/{machine_id}")
}

#[derive(Debug)]
pub struct ContractClient<E> {
    ctx: Context,
    executor: E,
}

impl<E: RequestExecutor> ContractClient<E> {
    pub fn new(ctx: Context, executor: E) -> Self {
        Self { ctx, executor }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn headers(token: Option<&str>) -> Headers {
        let mut headers = Headers::new();
        headers.insert("user-agent".to_string(), user_agent());
        headers.insert("accept".to_string(), "application/json".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        if let Some(token) = token {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        headers
    }

    async fn request(
        &self,
        method: Method,
        path: String,
        token: Option<&str>,
        data: Option<Value>,
    ) -> Result<ApiResponse, ContractApiError> {
        let request = ApiRequest {
            method,
            path,
            headers: Self::headers(token),
            data,
        };
        Ok(self.executor.execute(request).await?)
    }

    /// `{machineId, architecture, os: {...}}` for attach requests.
    fn attach_platform_data(&self, machine_id: &str) -> Result<Value, ClientError> {
        let platform = self.ctx.platform.platform()?;
        Ok(json!({
            "machineId": machine_id,
            "architecture": platform.arch,
            "os": {
                "distribution": platform.distribution,
                "kernel": platform.kernel,
                "release": platform.release,
                "series": platform.series,
                "type": "Linux",
            },
        }))
    }

    /// Only a body that parses as a machine token is cached; anything else
    /// would make the cache unreadable for every later operation.
    fn store_machine_token(&self, token: &Value, machine_id: &str) -> Result<(), ClientError> {
        MachineToken::from_value(token)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        self.ctx.cache.write(MACHINE_TOKEN_KEY, token)?;
        self.ctx
            .cache
            .write(MACHINE_ID_KEY, &Value::String(machine_id.to_string()))?;
        Ok(())
    }

    /// Exchanges a contract token for a machine token and caches it.
    pub async fn request_contract_machine_attach(
        &self,
        contract_token: &str,
    ) -> Result<Value, ClientError> {
        let machine_id = self.ctx.platform.machine_id()?;
        let data = self.attach_platform_data(&machine_id)?;
        let resp = self
            .request(
                Method::Post,
                API_V1_CONTEXT_MACHINE_TOKEN.to_string(),
                Some(contract_token),
                Some(data),
            )
            .await?;
        self.store_machine_token(&resp.body, &machine_id)?;
        info!(machine_id = %machine_id, "attached machine to contract");
        Ok(resp.body)
    }

    /// Refreshes (`POST`) or detaches (`DELETE`) this machine's contract
    /// context. Only a refresh updates the cached machine token.
    pub async fn request_machine_token_update(
        &self,
        machine_token: &str,
        contract_id: &str,
        detach: bool,
    ) -> Result<Value, ClientError> {
        self.machine_token_update(machine_token, contract_id, None, detach)
            .await
    }

    async fn machine_token_update(
        &self,
        machine_token: &str,
        contract_id: &str,
        machine_id: Option<&str>,
        detach: bool,
    ) -> Result<Value, ClientError> {
        let machine_id = match machine_id {
            Some(id) => id.to_string(),
            None => self.ctx.platform.machine_id()?,
        };
        let route = contract_machine_route(contract_id, &machine_id);

        let (method, data) = if detach {
            (Method::Delete, None)
        } else {
            let platform = self.ctx.platform.platform()?;
            let data = json!({
                "machineId": machine_id,
                "architecture": platform.arch,
                "os": {"kernel": platform.kernel},
            });
            (Method::Post, Some(data))
        };

        let resp = self.request(method, route, Some(machine_token), data).await?;
        if !detach {
            self.store_machine_token(&resp.body, &machine_id)?;
        }
        Ok(resp.body)
    }

    /// Fetches one resource's access context. The cached copy is a snapshot
    /// only; the machine token stays authoritative.
    pub async fn request_resource_machine_access(
        &self,
        machine_token: &str,
        resource: &str,
    ) -> Result<Value, ClientError> {
        let machine_id = self.ctx.platform.machine_id()?;
        let resp = self
            .request(
                Method::Get,
                resource_machine_access_route(resource, &machine_id),
                Some(machine_token),
                None,
            )
            .await?;
        self.ctx
            .cache
            .write(&machine_access_key(resource), &resp.body)?;
        Ok(resp.body)
    }

    /// Every resource the contract server knows about. Not cached.
    pub async fn request_resources(&self) -> Result<Vec<Value>, ContractApiError> {
        let resp = self
            .request(Method::Get, API_V1_RESOURCES.to_string(), None, None)
            .await?;
        Ok(match resp.body.get("resources") {
            Some(Value::Array(resources)) => resources.clone(),
            _ => Vec::new(),
        })
    }

    /// Detaches `machine_id` from `contract_id`, unless the machine id has
    /// changed since the cache was written: the contract context on the
    /// server may then belong to another machine record.
    pub async fn detach_machine_from_contract(
        &self,
        machine_token: &str,
        contract_id: &str,
        machine_id: &str,
    ) -> Result<Value, ClientError> {
        let current = self.ctx.platform.machine_id()?;
        if let Some(cached) = self.ctx.cache.read(MACHINE_ID_KEY)?
            && machine_id_text(&cached) != current
        {
            debug!(
                cached = %machine_id_text(&cached),
                current = %current,
                "Found new machine-id. Do not call detach on contract backend"
            );
            return Ok(Value::Object(Map::new()));
        }
        self.machine_token_update(machine_token, contract_id, Some(machine_id), true)
            .await
    }
}

/// Cached ids may have been written as numbers; compare their text form.
fn machine_id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
