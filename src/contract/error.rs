use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Deserializer};

use crate::{
    cache::CacheError,
    messages::{
        self, MESSAGE_ATTACH_EXPIRED_TOKEN, MESSAGE_ATTACH_INVALID_TOKEN, UserFacingError,
    },
    platform::PlatformError,
    transport::NetworkError,
};

pub const REASON_NO_LONGER_EFFECTIVE: &str = "no-longer-effective";
pub const REASON_NOT_EFFECTIVE_YET: &str = "not-effective-yet";
pub const REASON_NEVER_EFFECTIVE: &str = "never-effective";

const DATE_FORMAT: &str = "%B %d, %Y";

/// Error body returned by the contract server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub info: Option<ErrorInfo>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    #[serde(default)]
    pub contract_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "deserialize_rfc3339")]
    pub time: Option<DateTime<FixedOffset>>,
}

impl ErrorEnvelope {
    /// Bodies that are not a JSON error envelope parse as an empty envelope.
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn reason(&self) -> Option<&str> {
        self.info.as_ref()?.reason.as_deref()
    }
}

/// Parses timestamps as emitted by the contract server. A missing offset is
/// read as UTC.
pub fn parse_rfc3339_date(raw: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).or_else(|err| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc().fixed_offset())
            .map_err(|_| err)
    })
}

fn deserialize_rfc3339<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|raw| parse_rfc3339_date(&raw).ok()))
}

/// A failed contract call: the transport error plus the parsed envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractApiError {
    pub network: NetworkError,
    pub envelope: ErrorEnvelope,
}

impl ContractApiError {
    pub fn new(network: NetworkError, envelope: ErrorEnvelope) -> Self {
        Self { network, envelope }
    }

    pub fn code(&self) -> Option<u16> {
        self.network.code
    }

    /// Maps status and `info.reason` onto the message shown to the operator.
    pub fn user_facing(&self) -> UserFacingError {
        let Some(code) = self.code() else {
            return UserFacingError::new(messages::connectivity_error(&self.network.url));
        };
        match code {
            401 => UserFacingError::new(MESSAGE_ATTACH_INVALID_TOKEN),
            403 => self.forbidden(),
            _ => UserFacingError::new(messages::server_error(
                code,
                self.envelope.message.as_deref(),
            )),
        }
    }

    fn forbidden(&self) -> UserFacingError {
        let info = self.envelope.info.clone().unwrap_or_default();
        let contract_id = info.contract_id.as_deref().filter(|id| !id.is_empty());
        let date = info.time.map(|t| t.format(DATE_FORMAT).to_string());

        // Every specific reason names the contract; without one it is just an
        // expired token.
        let reason = match (self.envelope.reason(), contract_id, date) {
            (Some(REASON_NO_LONGER_EFFECTIVE), Some(id), Some(date)) => {
                messages::attach_forbidden_expired(id, &date)
            }
            (Some(REASON_NOT_EFFECTIVE_YET), Some(id), Some(date)) => {
                messages::attach_forbidden_not_yet(id, &date)
            }
            (Some(REASON_NEVER_EFFECTIVE), Some(id), _) => messages::attach_forbidden_never(id),
            _ => return UserFacingError::new(MESSAGE_ATTACH_EXPIRED_TOKEN),
        };
        UserFacingError::new(messages::attach_forbidden(&reason))
    }
}

impl From<NetworkError> for ContractApiError {
    fn from(network: NetworkError) -> Self {
        let envelope = ErrorEnvelope::parse(&network.body);
        Self { network, envelope }
    }
}

impl std::fmt::Display for ContractApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.envelope.message {
            Some(message) => write!(f, "contract api error: {}: {message}", self.network),
            None => write!(f, "contract api error: {}", self.network),
        }
    }
}

impl std::error::Error for ContractApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.network)
    }
}

#[derive(Debug)]
pub enum ClientError {
    Api(ContractApiError),
    Cache(CacheError),
    Platform(PlatformError),
    InvalidResponse(String),
}

impl ClientError {
    /// The operator-facing form of this error.
    pub fn user_facing(&self) -> UserFacingError {
        match self {
            Self::Api(e) => e.user_facing(),
            other => UserFacingError::new(other.to_string()),
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api(e) => write!(f, "{e}"),
            Self::Cache(e) => write!(f, "{e}"),
            Self::Platform(e) => write!(f, "platform error: {e}"),
            Self::InvalidResponse(msg) => write!(f, "invalid contract response: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Api(e) => Some(e),
            Self::Cache(e) => Some(e),
            Self::Platform(e) => Some(e),
            Self::InvalidResponse(_) => None,
        }
    }
}

impl From<ContractApiError> for ClientError {
    fn from(value: ContractApiError) -> Self {
        Self::Api(value)
    }
}

impl From<CacheError> for ClientError {
    fn from(value: CacheError) -> Self {
        Self::Cache(value)
    }
}

impl From<PlatformError> for ClientError {
    fn from(value: PlatformError) -> Self {
        Self::Platform(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{
        attach_forbidden, attach_forbidden_expired, attach_forbidden_never,
        attach_forbidden_not_yet,
    };
    use crate::transport::Headers;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn api_error(code: u16, body: &str) -> ContractApiError {
        NetworkError::http("http://me", code, Headers::new(), body).into()
    }

    const NO_LONGER_EFFECTIVE: &str = r#"{
        "code": "forbidden",
        "info": {
            "contractId": "contract-id",
            "reason": "no-longer-effective",
            "time": "2021-05-07T09:46:37.791Z"
        },
        "message": "contract \"contract-id\" is no longer effective",
        "traceId": "7f58c084-f753-455d-9bdc-65b839d6536f"
    }"#;

    #[test]
    fn envelope_parses_timestamps() {
        let envelope = ErrorEnvelope::parse(NO_LONGER_EFFECTIVE);
        let info = envelope.info.clone().unwrap();
        assert_eq!(envelope.code.as_deref(), Some("forbidden"));
        assert_eq!(
            envelope.trace_id.as_deref(),
            Some("7f58c084-f753-455d-9bdc-65b839d6536f")
        );
        assert_eq!(info.contract_id.as_deref(), Some("contract-id"));
        assert_eq!(
            info.time.unwrap().timestamp(),
            Utc.with_ymd_and_hms(2021, 5, 7, 9, 46, 37).unwrap().timestamp()
        );
    }

    #[test]
    fn rfc3339_dates_with_and_without_offsets() {
        let cases = [
            ("2001-02-03T04:05:06", 0),
            ("2001-02-03T04:05:06Z", 0),
            ("2001-02-03T04:05:06-08:00", -8 * 3600),
            ("2001-02-03T04:05:06+03:00", 3 * 3600),
            ("2021-05-28T14:42:37.944609726-04:00", -4 * 3600),
        ];
        for (raw, offset) in cases {
            let parsed = parse_rfc3339_date(raw).unwrap();
            assert_eq!(parsed.offset().local_minus_utc(), offset, "{raw}");
        }
        assert!(parse_rfc3339_date("yesterday").is_err());
    }

    #[test]
    fn unparseable_bodies_give_an_empty_envelope() {
        assert_eq!(ErrorEnvelope::parse(""), ErrorEnvelope::default());
        assert_eq!(ErrorEnvelope::parse("<html>"), ErrorEnvelope::default());
        let bad_time = ErrorEnvelope::parse(r#"{"info": {"reason": "x", "time": "soon"}}"#);
        assert_eq!(bad_time.info.unwrap().time, None);
    }

    #[test]
    fn unauthorized_is_an_invalid_token() {
        assert_eq!(
            api_error(401, r#"{"message": "unauthorized"}"#).user_facing().msg(),
            MESSAGE_ATTACH_INVALID_TOKEN
        );
    }

    #[test]
    fn forbidden_with_empty_body_is_an_expired_token() {
        assert_eq!(api_error(403, "{}").user_facing().msg(), MESSAGE_ATTACH_EXPIRED_TOKEN);
        assert_eq!(api_error(403, "").user_facing().msg(), MESSAGE_ATTACH_EXPIRED_TOKEN);
    }

    #[test]
    fn forbidden_reasons_name_the_contract_and_date() {
        assert_eq!(
            api_error(403, NO_LONGER_EFFECTIVE).user_facing().msg(),
            attach_forbidden(&attach_forbidden_expired("contract-id", "May 07, 2021"))
        );

        let not_yet = NO_LONGER_EFFECTIVE.replace("no-longer-effective", "not-effective-yet");
        assert_eq!(
            api_error(403, &not_yet).user_facing().msg(),
            attach_forbidden(&attach_forbidden_not_yet("contract-id", "May 07, 2021"))
        );

        let never = r#"{"code": "forbidden", "info": {"contractId": "contract-id", "reason": "never-effective"}}"#;
        assert_eq!(
            api_error(403, never).user_facing().msg(),
            attach_forbidden(&attach_forbidden_never("contract-id"))
        );
    }

    #[test]
    fn forbidden_with_unknown_reason_or_missing_date_falls_back() {
        let unknown = NO_LONGER_EFFECTIVE.replace("no-longer-effective", "suspended");
        assert_eq!(api_error(403, &unknown).user_facing().msg(), MESSAGE_ATTACH_EXPIRED_TOKEN);

        let no_date = r#"{"info": {"contractId": "c", "reason": "no-longer-effective"}}"#;
        assert_eq!(api_error(403, no_date).user_facing().msg(), MESSAGE_ATTACH_EXPIRED_TOKEN);
    }

    #[test]
    fn forbidden_without_contract_id_falls_back() {
        for body in [
            r#"{"info": {"reason": "never-effective"}}"#,
            r#"{"info": {"contractId": "", "reason": "never-effective"}}"#,
            r#"{"info": {"reason": "no-longer-effective", "time": "2021-05-07T09:46:37Z"}}"#,
        ] {
            assert_eq!(
                api_error(403, body).user_facing().msg(),
                MESSAGE_ATTACH_EXPIRED_TOKEN,
                "{body}"
            );
        }
    }

    #[test]
    fn other_statuses_and_connection_failures() {
        assert_eq!(
            api_error(500, r#"{"message": "boom"}"#).user_facing().msg(),
            messages::server_error(500, Some("boom"))
        );
        let offline: ContractApiError = NetworkError::connection("http://me/v1", "dns failure").into();
        assert_eq!(offline.code(), None);
        assert_eq!(offline.user_facing().msg(), messages::connectivity_error("http://me/v1"));
    }
}
