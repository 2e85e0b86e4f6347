//! Messages shown to the operator when an attach or refresh does not succeed.

pub const MESSAGE_ATTACH_INVALID_TOKEN: &str =
    "Invalid token. Obtain a valid token from your subscription dashboard.";

pub const MESSAGE_ATTACH_EXPIRED_TOKEN: &str =
    "Expired token or contract. Obtain a new token from your subscription dashboard.";

pub const MESSAGE_ATTACH_FAILURE_DEFAULT_SERVICES: &str =
    "Failed to enable or refresh one or more services. Check the log for details.";

pub const MESSAGE_UNEXPECTED_ERROR: &str =
    "Unexpected error(s) occurred.\nFor more details, rerun with RUST_LOG=debug and check the log.";

pub fn attach_forbidden(reason: &str) -> String {
    format!("Cannot attach machine. {reason}")
}

pub fn attach_forbidden_expired(contract_id: &str, date: &str) -> String {
    format!("Contract \"{contract_id}\" expired on {date}")
}

pub fn attach_forbidden_not_yet(contract_id: &str, date: &str) -> String {
    format!("Contract \"{contract_id}\" is not effective until {date}")
}

pub fn attach_forbidden_never(contract_id: &str) -> String {
    format!("Contract \"{contract_id}\" has never been effective")
}

pub fn connectivity_error(url: &str) -> String {
    format!("Failed to connect to the contract server: {url}")
}

pub fn server_error(code: u16, detail: Option<&str>) -> String {
    match detail {
        Some(detail) => format!("Contract server returned HTTP {code}: {detail}"),
        None => format!("Contract server returned HTTP {code}"),
    }
}

/// An error whose message is meant to be printed as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFacingError {
    msg: String,
}

impl UserFacingError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }
}

impl std::fmt::Display for UserFacingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.msg)
    }
}

impl std::error::Error for UserFacingError {}
