use std::sync::Arc;

use crate::{
    cache::{CacheError, CacheStore, MACHINE_TOKEN_KEY},
    entitlement::{MachineToken, ProcessorRegistry},
    platform::PlatformInfo,
};

/// Everything an operation needs from the host, passed explicitly.
#[derive(Clone)]
pub struct Context {
    pub cache: Arc<dyn CacheStore>,
    pub platform: Arc<dyn PlatformInfo>,
    pub processors: Arc<ProcessorRegistry>,
}

impl Context {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        platform: Arc<dyn PlatformInfo>,
        processors: ProcessorRegistry,
    ) -> Self {
        Self {
            cache,
            platform,
            processors: Arc::new(processors),
        }
    }

    /// The cached machine token, `None` on an unattached machine.
    pub fn machine_token(&self) -> Result<Option<MachineToken>, CacheError> {
        let Some(raw) = self.cache.read(MACHINE_TOKEN_KEY)? else {
            return Ok(None);
        };
        Ok(Some(MachineToken::from_value(&raw)?))
    }

    pub fn is_attached(&self) -> Result<bool, CacheError> {
        Ok(self
            .machine_token()?
            .is_some_and(|t| !t.machine_token.is_empty()))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("processors", &self.processors)
            .finish_non_exhaustive()
    }
}
