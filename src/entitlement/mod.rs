use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod delta;
pub mod registry;

pub use delta::{
    DeltaError, DeltaOptions, DeltaValue, EntitlementDelta, apply_series_overrides,
    dict_deltas, process_entitlement_delta,
};
pub use registry::{EntitlementProcessor, LoggingProcessor, ProcessError, ProcessorRegistry};

/// One entry of `resourceEntitlements`. `kind` (the wire `type`) identifies
/// the service; every other service-specific key lives in `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entitled: Option<bool>,
    /// Series name to override fragment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub series: BTreeMap<String, Map<String, Value>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntitlementRecord {
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn is_entitled(&self) -> bool {
        self.entitled.unwrap_or(false)
    }

    /// The record as a plain JSON object, as it appears on the wire.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.fields.clone();
        if let Some(kind) = &self.kind {
            map.insert("type".to_string(), Value::String(kind.clone()));
        }
        if let Some(entitled) = self.entitled {
            map.insert("entitled".to_string(), Value::Bool(entitled));
        }
        if !self.series.is_empty() {
            let series = self
                .series
                .iter()
                .map(|(k, v)| (k.clone(), Value::Object(v.clone())))
                .collect();
            map.insert("series".to_string(), Value::Object(series));
        }
        map
    }
}

/// The unit the delta engine compares: `{"entitlement": {...}, ...}`.
/// `AccessRecord::default()` stands for "no previous record".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entitlement: Option<EntitlementRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccessRecord {
    pub fn new(entitlement: EntitlementRecord) -> Self {
        Self {
            entitlement: Some(entitlement),
            extra: Map::new(),
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.entitlement.as_ref().and_then(EntitlementRecord::kind)
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        if let Some(ent) = &self.entitlement {
            map.insert("entitlement".to_string(), Value::Object(ent.to_map()));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineToken {
    pub machine_token: String,
    pub machine_token_info: MachineTokenInfo,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineTokenInfo {
    pub contract_info: ContractInfo,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub id: String,
    #[serde(default)]
    pub resource_entitlements: Vec<EntitlementRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MachineToken {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    pub fn contract_id(&self) -> &str {
        &self.machine_token_info.contract_info.id
    }

    pub fn entitlements(&self) -> &[EntitlementRecord] {
        &self.machine_token_info.contract_info.resource_entitlements
    }

    pub fn entitlement(&self, kind: &str) -> Option<&EntitlementRecord> {
        self.entitlements().iter().find(|e| e.kind() == Some(kind))
    }

    /// Entitlements ordered by `type`, independent of backend array order.
    pub fn sorted_entitlements(&self) -> Vec<&EntitlementRecord> {
        let mut sorted: Vec<_> = self.entitlements().iter().collect();
        sorted.sort_by(|a, b| a.kind().unwrap_or("").cmp(b.kind().unwrap_or("")));
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn token_json() -> Value {
        json!({
            "machineToken": "mToken",
            "machineTokenInfo": {
                "accountInfo": {"name": "acct"},
                "contractInfo": {
                    "id": "cid",
                    "name": "contract",
                    "resourceEntitlements": [
                        {"type": "ent2", "entitled": false},
                        {
                            "type": "ent1",
                            "entitled": true,
                            "directives": {"suites": ["jammy"]},
                            "series": {"focal": {"directives": {"suites": ["focal"]}}}
                        }
                    ]
                }
            },
            "expires": "2030-01-01T00:00:00Z"
        })
    }

    #[test]
    fn machine_token_parses_and_keeps_unknown_keys() {
        let token = MachineToken::from_value(&token_json()).unwrap();
        assert_eq!(token.machine_token, "mToken");
        assert_eq!(token.contract_id(), "cid");
        assert_eq!(token.extra.get("expires"), Some(&json!("2030-01-01T00:00:00Z")));

        let ent1 = token.entitlement("ent1").unwrap();
        assert!(ent1.is_entitled());
        assert_eq!(ent1.series.len(), 1);
        assert_eq!(
            ent1.fields.get("directives"),
            Some(&json!({"suites": ["jammy"]}))
        );

        assert_eq!(serde_json::to_value(&token).unwrap(), token_json());
    }

    #[test]
    fn sorted_entitlements_orders_by_type() {
        let token = MachineToken::from_value(&token_json()).unwrap();
        let kinds: Vec<_> = token
            .sorted_entitlements()
            .into_iter()
            .map(|e| e.kind().unwrap())
            .collect();
        assert_eq!(kinds, vec!["ent1", "ent2"]);
    }

    #[test]
    fn access_record_round_trips_wire_shape() {
        let raw = json!({
            "entitlement": {"type": "livepatch", "entitled": true, "obligations": {}},
            "resourceToken": "rtok"
        });
        let access: AccessRecord = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(access.kind(), Some("livepatch"));
        assert_eq!(access.to_value(), raw);
        assert_eq!(AccessRecord::default().to_value(), json!({}));
    }
}
