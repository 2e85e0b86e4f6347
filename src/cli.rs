use std::{collections::BTreeSet, sync::Arc};

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use crate::{
    cache::{CacheError, FileCache, MACHINE_ID_KEY, MACHINE_TOKEN_KEY, machine_access_key},
    config::Config,
    context::Context,
    contract::{ClientError, ContractClient},
    entitlement::{LoggingProcessor, MachineToken, ProcessorRegistry},
    platform::HostPlatform,
    refresh::{ConfigError, RefreshError, request_updated_contract},
    resources::get_available_resources,
    transport::ReqwestExecutor,
};

pub const EXIT_USER_FACING: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_NETWORK: i32 = 3;

#[derive(Parser, Debug)]
#[command(
    name = "contract-sync",
    about = "Keep this machine's entitlements in sync with its contract",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Attach this machine using a contract token.
    Attach(AttachArgs),

    /// Refresh the cached machine token and apply entitlement changes.
    Refresh,

    /// Detach this machine from its contract.
    Detach,

    /// Fetch and cache the access context of one resource.
    Access(AccessArgs),

    /// List every resource offered by the contract server.
    Resources,
}

#[derive(Args, Debug, Clone)]
pub struct AttachArgs {
    #[arg(long, env = "CONTRACT_SYNC_TOKEN", value_name = "TOKEN", hide_env_values = true)]
    pub token: String,
}

#[derive(Args, Debug, Clone)]
pub struct AccessArgs {
    #[arg(value_name = "RESOURCE")]
    pub resource: String,
}

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<RefreshError> for ExitError {
    fn from(value: RefreshError) -> Self {
        match value {
            RefreshError::Config(e) => Self::new(EXIT_CONFIG, e.to_string()),
            RefreshError::UserFacing(e) => Self::new(EXIT_USER_FACING, e.msg()),
        }
    }
}

impl From<ClientError> for ExitError {
    fn from(value: ClientError) -> Self {
        Self::new(EXIT_USER_FACING, value.user_facing().msg())
    }
}

pub async fn run() -> i32 {
    let cli = Cli::parse();

    let client = match build_client(&cli.config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}", e.message);
            return e.code;
        }
    };

    let res: Result<(), ExitError> = match cli.command {
        Command::Attach(args) => cmd_attach(&client, args).await,
        Command::Refresh => cmd_refresh(&client).await,
        Command::Detach => cmd_detach(&client).await,
        Command::Access(args) => cmd_access(&client, args).await,
        Command::Resources => cmd_resources(&client).await,
    };

    match res {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e.message);
            e.code
        }
    }
}

fn build_client(config: &Config) -> Result<ContractClient<ReqwestExecutor>, ExitError> {
    let mut registry = ProcessorRegistry::new();
    for service in &config.services {
        registry.register(service.as_str(), Arc::new(LoggingProcessor));
    }
    let ctx = Context::new(
        Arc::new(FileCache::new(config.cache_dir())),
        Arc::new(HostPlatform::new(&config.root, &config.data_dir)),
        registry,
    );
    let executor = ReqwestExecutor::new(config.contract_url.clone(), config.timeout())
        .map_err(|e| ExitError::new(EXIT_CONFIG, format!("build http client: {e}")))?;
    Ok(ContractClient::new(ctx, executor))
}

fn attached_token(client: &ContractClient<ReqwestExecutor>) -> Result<MachineToken, ExitError> {
    client
        .context()
        .machine_token()
        .map_err(ClientError::from)?
        .filter(|t| !t.machine_token.is_empty())
        .ok_or_else(|| ExitError::new(EXIT_CONFIG, ConfigError::NotAttached.to_string()))
}

fn print_json(value: &Value) -> Result<(), ExitError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| ExitError::new(EXIT_USER_FACING, format!("encode output: {e}")))?;
    println!("{out}");
    Ok(())
}

async fn cmd_attach(
    client: &ContractClient<ReqwestExecutor>,
    args: AttachArgs,
) -> Result<(), ExitError> {
    request_updated_contract(client, Some(&args.token)).await?;
    eprintln!("This machine is now attached.");
    Ok(())
}

async fn cmd_refresh(client: &ContractClient<ReqwestExecutor>) -> Result<(), ExitError> {
    request_updated_contract(client, None).await?;
    eprintln!("Successfully refreshed your subscription.");
    Ok(())
}

async fn cmd_detach(client: &ContractClient<ReqwestExecutor>) -> Result<(), ExitError> {
    let token = attached_token(client)?;
    let ctx = client.context();
    let machine_id = ctx.platform.machine_id().map_err(ClientError::from)?;
    client
        .detach_machine_from_contract(&token.machine_token, token.contract_id(), &machine_id)
        .await?;
    clear_machine_cache(ctx, &token).map_err(ClientError::from)?;
    info!(contract_id = token.contract_id(), "detached machine");
    eprintln!("This machine is now detached.");
    Ok(())
}

/// Removes everything the attachment left behind: the token, the machine id
/// it was issued for and the access snapshot of every resource the token or
/// the registry names.
fn clear_machine_cache(ctx: &Context, token: &MachineToken) -> Result<(), CacheError> {
    let mut resources: BTreeSet<&str> = ctx.processors.kinds().collect();
    resources.extend(token.entitlements().iter().filter_map(|e| e.kind()));
    for resource in resources {
        // A type that cannot name a cache key never had a snapshot written.
        match ctx.cache.delete(&machine_access_key(resource)) {
            Ok(()) | Err(CacheError::InvalidKey(_)) => {}
            Err(e) => return Err(e),
        }
    }
    ctx.cache.delete(MACHINE_ID_KEY)?;
    ctx.cache.delete(MACHINE_TOKEN_KEY)
}

async fn cmd_access(
    client: &ContractClient<ReqwestExecutor>,
    args: AccessArgs,
) -> Result<(), ExitError> {
    let token = attached_token(client)?;
    let access = client
        .request_resource_machine_access(&token.machine_token, &args.resource)
        .await?;
    print_json(&access)
}

async fn cmd_resources(client: &ContractClient<ReqwestExecutor>) -> Result<(), ExitError> {
    let resources = get_available_resources(client)
        .await
        .map_err(|e| ExitError::new(EXIT_NETWORK, format!("failed to list resources: {e}")))?;
    print_json(&Value::Array(resources))
}
