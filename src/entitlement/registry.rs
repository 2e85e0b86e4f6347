use std::{collections::BTreeMap, sync::Arc};

use tracing::info;

use crate::{
    entitlement::{AccessRecord, delta::EntitlementDelta},
    messages::UserFacingError,
};

#[derive(Debug)]
pub enum ProcessError {
    /// A failure with a message fit for the operator.
    UserFacing(UserFacingError),
    Unexpected(anyhow::Error),
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserFacing(e) => write!(f, "{e}"),
            Self::Unexpected(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UserFacing(e) => Some(e),
            Self::Unexpected(e) => Some(&**e),
        }
    }
}

impl From<UserFacingError> for ProcessError {
    fn from(value: UserFacingError) -> Self {
        Self::UserFacing(value)
    }
}

impl From<anyhow::Error> for ProcessError {
    fn from(value: anyhow::Error) -> Self {
        Self::Unexpected(value)
    }
}

/// Applies contract changes for one entitlement type.
pub trait EntitlementProcessor: Send + Sync {
    fn process_contract_deltas(
        &self,
        old_access: &AccessRecord,
        delta: &EntitlementDelta,
        allow_enable: bool,
    ) -> Result<(), ProcessError>;
}

/// Entitlement `type` to the processor responsible for it.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: BTreeMap<String, Arc<dyn EntitlementProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        processor: Arc<dyn EntitlementProcessor>,
    ) -> &mut Self {
        self.processors.insert(kind.into(), processor);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn EntitlementProcessor>> {
        self.processors.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.processors.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

/// Records the received delta in the log and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProcessor;

impl EntitlementProcessor for LoggingProcessor {
    fn process_contract_deltas(
        &self,
        old_access: &AccessRecord,
        delta: &EntitlementDelta,
        allow_enable: bool,
    ) -> Result<(), ProcessError> {
        let kind = old_access.kind().or_else(|| delta.kind()).unwrap_or("unknown");
        info!(
            entitlement = kind,
            allow_enable,
            delta = %delta.to_value(),
            "contract deltas received"
        );
        Ok(())
    }
}
