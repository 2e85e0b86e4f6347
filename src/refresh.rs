//! Attach or refresh the machine's contract, then apply every entitlement
//! change the new machine token carries.

use tracing::{error, info, warn};

use crate::{
    context::Context,
    contract::{ClientError, ContractClient},
    entitlement::{
        AccessRecord, DeltaError, DeltaOptions, MachineToken, ProcessError,
        process_entitlement_delta,
    },
    messages::{MESSAGE_ATTACH_FAILURE_DEFAULT_SERVICES, MESSAGE_UNEXPECTED_ERROR, UserFacingError},
    transport::RequestExecutor,
};

/// Invalid combinations of machine state and arguments. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    AlreadyAttached,
    NotAttached,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyAttached => {
                f.write_str("Got unexpected contract_token on an already attached machine")
            }
            Self::NotAttached => f.write_str("This machine is not attached to a contract"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    Config(ConfigError),
    UserFacing(UserFacingError),
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::UserFacing(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RefreshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::UserFacing(e) => Some(e),
        }
    }
}

impl From<ConfigError> for RefreshError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<UserFacingError> for RefreshError {
    fn from(value: UserFacingError) -> Self {
        Self::UserFacing(value)
    }
}

impl From<ClientError> for RefreshError {
    fn from(value: ClientError) -> Self {
        Self::UserFacing(value.user_facing())
    }
}

/// Result of applying one entitlement's delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementOutcome {
    Ok,
    UserFacingFailure(String),
    UnexpectedFailure(String),
}

impl EntitlementOutcome {
    fn from_delta_result(result: Result<(), DeltaError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(e @ DeltaError::UnsupportedType(_)) => Self::UserFacingFailure(e.to_string()),
            Err(DeltaError::Processor(ProcessError::UserFacing(e))) => {
                Self::UserFacingFailure(e.msg().to_string())
            }
            Err(other) => Self::UnexpectedFailure(other.to_string()),
        }
    }
}

/// Collapses per-entitlement outcomes into one result. Unexpected failures
/// take precedence over user-facing ones.
pub fn reduce_outcomes<'a>(
    outcomes: impl IntoIterator<Item = &'a EntitlementOutcome>,
) -> Result<(), UserFacingError> {
    let mut user_facing = false;
    for outcome in outcomes {
        match outcome {
            EntitlementOutcome::Ok => {}
            EntitlementOutcome::UserFacingFailure(_) => user_facing = true,
            EntitlementOutcome::UnexpectedFailure(_) => {
                return Err(UserFacingError::new(MESSAGE_UNEXPECTED_ERROR));
            }
        }
    }
    if user_facing {
        return Err(UserFacingError::new(MESSAGE_ATTACH_FAILURE_DEFAULT_SERVICES));
    }
    Ok(())
}

/// Attaches with `contract_token`, or refreshes an attached machine when no
/// token is given, then processes every entitlement of the resulting
/// machine token in `type` order.
pub async fn request_updated_contract<E: RequestExecutor>(
    client: &ContractClient<E>,
    contract_token: Option<&str>,
) -> Result<(), RefreshError> {
    let ctx = client.context();
    let previous = ctx.machine_token().map_err(ClientError::from)?;
    let attached = previous.as_ref().filter(|t| !t.machine_token.is_empty());

    let raw = match (attached, contract_token) {
        (Some(_), Some(_)) => return Err(ConfigError::AlreadyAttached.into()),
        (None, None) => return Err(ConfigError::NotAttached.into()),
        (None, Some(token)) => client.request_contract_machine_attach(token).await?,
        (Some(current), None) => {
            client
                .request_machine_token_update(&current.machine_token, current.contract_id(), false)
                .await?
        }
    };
    let updated = MachineToken::from_value(&raw)
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

    let outcomes = process_entitlements(ctx, attached, &updated);
    reduce_outcomes(&outcomes)?;
    info!(
        contract_id = updated.contract_id(),
        entitlements = outcomes.len(),
        "contract updated"
    );
    Ok(())
}

fn process_entitlements(
    ctx: &Context,
    previous: Option<&MachineToken>,
    updated: &MachineToken,
) -> Vec<EntitlementOutcome> {
    updated
        .sorted_entitlements()
        .into_iter()
        .map(|record| {
            let old = match (previous, record.kind()) {
                (Some(prev), Some(kind)) => prev
                    .entitlement(kind)
                    .cloned()
                    .map(AccessRecord::new)
                    .unwrap_or_default(),
                _ => AccessRecord::default(),
            };
            let new = AccessRecord::new(record.clone());
            let result =
                process_entitlement_delta(ctx, &old, &new, DeltaOptions::default()).map(|_| ());
            let outcome = EntitlementOutcome::from_delta_result(result);
            let kind = record.kind().unwrap_or("unknown");
            match &outcome {
                EntitlementOutcome::Ok => {}
                EntitlementOutcome::UserFacingFailure(msg) => {
                    warn!(entitlement = kind, error = %msg, "failed to process contract delta");
                }
                EntitlementOutcome::UnexpectedFailure(msg) => {
                    error!(entitlement = kind, error = %msg, "unexpected error processing contract delta");
                }
            }
            outcome
        })
        .collect()
}
