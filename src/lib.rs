pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod contract;
pub mod entitlement;
pub mod messages;
pub mod platform;
pub mod redact;
pub mod refresh;
pub mod resources;
pub mod transport;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;
