//! Fakes shared by the unit tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use serde_json::Value;

use crate::{
    cache::MemoryCache,
    context::Context,
    entitlement::{AccessRecord, EntitlementDelta, EntitlementProcessor, ProcessError, ProcessorRegistry},
    messages::UserFacingError,
    platform::{Platform, PlatformError, PlatformInfo},
    transport::{ApiRequest, ApiResponse, Headers, Method, NetworkError, RequestExecutor},
};

#[derive(Debug, Clone)]
pub(crate) struct FakePlatform {
    pub platform: Platform,
    pub machine_id: String,
}

impl FakePlatform {
    pub fn new(series: &str, machine_id: &str) -> Self {
        Self {
            platform: Platform {
                arch: "arch".to_string(),
                kernel: "kernel".to_string(),
                series: series.to_string(),
                distribution: "Ubuntu".to_string(),
                release: "22.04".to_string(),
            },
            machine_id: machine_id.to_string(),
        }
    }
}

impl PlatformInfo for FakePlatform {
    fn platform(&self) -> Result<Platform, PlatformError> {
        Ok(self.platform.clone())
    }

    fn machine_id(&self) -> Result<String, PlatformError> {
        Ok(self.machine_id.clone())
    }
}

/// Canned responses keyed by `(method, path)`; every request is recorded.
#[derive(Debug, Default)]
pub(crate) struct FakeExecutor {
    responses: Mutex<BTreeMap<(String, String), Result<Value, NetworkError>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeExecutor {
    pub fn respond(&self, method: Method, path: impl Into<String>, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.into()), Ok(body));
    }

    pub fn fail(&self, method: Method, path: impl Into<String>, err: NetworkError) {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.into()), Err(err));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl RequestExecutor for FakeExecutor {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, NetworkError> {
        let key = (request.method.to_string(), request.path.clone());
        self.requests.lock().unwrap().push(request);
        let canned = self.responses.lock().unwrap().get(&key).cloned();
        match canned {
            Some(Ok(body)) => Ok(ApiResponse {
                body,
                headers: Headers::new(),
            }),
            Some(Err(err)) => Err(err),
            None => Err(NetworkError::http(
                format!("http://fake{}", key.1),
                404,
                Headers::new(),
                "{}",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProcessCall {
    pub kind: Option<String>,
    pub old: AccessRecord,
    pub delta: EntitlementDelta,
    pub allow_enable: bool,
}

pub(crate) type CallLog = Arc<Mutex<Vec<ProcessCall>>>;

#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Ok,
    UserFacing(String),
    Unexpected(String),
}

#[derive(Debug)]
pub(crate) struct RecordingProcessor {
    outcome: Outcome,
    log: CallLog,
}

impl Default for RecordingProcessor {
    fn default() -> Self {
        Self::with_log(CallLog::default(), Outcome::Ok)
    }
}

impl RecordingProcessor {
    pub fn with_log(log: CallLog, outcome: Outcome) -> Self {
        Self { outcome, log }
    }

    pub fn failing_user_facing(msg: &str) -> Self {
        Self::with_log(CallLog::default(), Outcome::UserFacing(msg.to_string()))
    }

    pub fn calls(&self) -> Vec<ProcessCall> {
        self.log.lock().unwrap().clone()
    }
}

impl EntitlementProcessor for RecordingProcessor {
    fn process_contract_deltas(
        &self,
        old_access: &AccessRecord,
        delta: &EntitlementDelta,
        allow_enable: bool,
    ) -> Result<(), ProcessError> {
        self.log.lock().unwrap().push(ProcessCall {
            kind: old_access.kind().or_else(|| delta.kind()).map(str::to_string),
            old: old_access.clone(),
            delta: delta.clone(),
            allow_enable,
        });
        match &self.outcome {
            Outcome::Ok => Ok(()),
            Outcome::UserFacing(msg) => Err(ProcessError::UserFacing(UserFacingError::new(msg))),
            Outcome::Unexpected(msg) => Err(ProcessError::Unexpected(anyhow::anyhow!("{msg}"))),
        }
    }
}

pub(crate) fn test_context<const N: usize>(
    series: &str,
    processors: [(&str, Arc<RecordingProcessor>); N],
) -> (Context, Arc<MemoryCache>) {
    context_with_platform(FakePlatform::new(series, "mid"), processors)
}

pub(crate) fn context_with_platform<const N: usize>(
    platform: FakePlatform,
    processors: [(&str, Arc<RecordingProcessor>); N],
) -> (Context, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let mut registry = ProcessorRegistry::new();
    for (kind, processor) in processors {
        registry.register(kind, processor);
    }
    let ctx = Context::new(cache.clone(), Arc::new(platform), registry);
    (ctx, cache)
}
