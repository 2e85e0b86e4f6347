pub const VERSION: &str = match option_env!("CONTRACT_SYNC_BUILD_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

pub const CLIENT_NAME: &str = "contract-sync";

pub fn user_agent() -> String {
    format!("{CLIENT_NAME}/{VERSION}")
}
