use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    context::Context,
    entitlement::{AccessRecord, EntitlementRecord, registry::ProcessError},
    platform::PlatformError,
};

/// One changed key of an entitlement.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaValue {
    /// New or changed value, reported in full.
    Value(Value),
    /// Present in the old record, absent from the new one.
    Dropped,
    /// Both sides are objects; only their differing keys are kept.
    Nested(BTreeMap<String, DeltaValue>),
}

impl DeltaValue {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Dropped => Value::Null,
            Self::Nested(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }
}

/// Keys of `entitlement` that differ between two access records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitlementDelta {
    pub entitlement: BTreeMap<String, DeltaValue>,
}

impl EntitlementDelta {
    pub fn is_empty(&self) -> bool {
        self.entitlement.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&DeltaValue> {
        self.entitlement.get(key)
    }

    pub fn kind(&self) -> Option<&str> {
        match self.entitlement.get("type") {
            Some(DeltaValue::Value(Value::String(kind))) => Some(kind),
            _ => None,
        }
    }

    /// `{"entitlement": {...}}`, or `{}` when nothing changed. Dropped keys
    /// render as `null`.
    pub fn to_value(&self) -> Value {
        if self.is_empty() {
            return Value::Object(Map::new());
        }
        let entitlement = self
            .entitlement
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        let mut map = Map::new();
        map.insert("entitlement".to_string(), Value::Object(entitlement));
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaOptions {
    pub allow_enable: bool,
    pub series_overrides: bool,
}

impl Default for DeltaOptions {
    fn default() -> Self {
        Self {
            allow_enable: false,
            series_overrides: true,
        }
    }
}

#[derive(Debug)]
pub enum DeltaError {
    MissingType { old: String, new: String },
    UnsupportedType(String),
    Platform(PlatformError),
    Processor(ProcessError),
}

impl std::fmt::Display for DeltaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingType { old, new } => {
                write!(f, "Could not determine contract delta service type {old} {new}")
            }
            Self::UnsupportedType(kind) => write!(f, "Unsupported entitlement type: {kind}"),
            Self::Platform(e) => write!(f, "platform error: {e}"),
            Self::Processor(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DeltaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MissingType { .. } | Self::UnsupportedType(_) => None,
            Self::Platform(e) => Some(e),
            Self::Processor(e) => Some(e),
        }
    }
}

impl From<PlatformError> for DeltaError {
    fn from(value: PlatformError) -> Self {
        Self::Platform(value)
    }
}

impl From<ProcessError> for DeltaError {
    fn from(value: ProcessError) -> Self {
        Self::Processor(value)
    }
}

/// Recursive key-wise diff of two JSON objects.
pub fn dict_deltas(old: &Map<String, Value>, new: &Map<String, Value>) -> BTreeMap<String, DeltaValue> {
    let mut deltas = BTreeMap::new();
    for (key, new_value) in new {
        match (old.get(key), new_value) {
            (Some(old_value), _) if old_value == new_value => {}
            (Some(Value::Object(old_obj)), Value::Object(new_obj)) => {
                let nested = dict_deltas(old_obj, new_obj);
                if !nested.is_empty() {
                    deltas.insert(key.clone(), DeltaValue::Nested(nested));
                }
            }
            _ => {
                deltas.insert(key.clone(), DeltaValue::Value(new_value.clone()));
            }
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            deltas.insert(key.clone(), DeltaValue::Dropped);
        }
    }
    deltas
}

/// Returns `record` with the fragment for `series` merged over it and the
/// `series` table removed. Nested objects merge key by key; any other value
/// in the fragment replaces the original.
pub fn apply_series_overrides(record: &EntitlementRecord, series: &str) -> EntitlementRecord {
    let mut merged = EntitlementRecord {
        series: BTreeMap::new(),
        ..record.clone()
    };
    let Some(fragment) = record.series.get(series) else {
        return merged;
    };

    for (key, value) in fragment {
        match key.as_str() {
            "type" => {
                if let Value::String(kind) = value {
                    merged.kind = Some(kind.clone());
                }
            }
            "entitled" => {
                if let Value::Bool(entitled) = value {
                    merged.entitled = Some(*entitled);
                }
            }
            "series" => {}
            _ => overlay_value(&mut merged.fields, key, value),
        }
    }
    merged
}

fn overlay_value(base: &mut Map<String, Value>, key: &str, value: &Value) {
    match (base.get_mut(key), value) {
        (Some(Value::Object(base_obj)), Value::Object(fragment)) => {
            for (k, v) in fragment {
                overlay_value(base_obj, k, v);
            }
        }
        _ => {
            base.insert(key.to_string(), value.clone());
        }
    }
}

fn comparison_view(access: &AccessRecord, series: Option<&str>) -> Map<String, Value> {
    match (&access.entitlement, series) {
        (None, _) => Map::new(),
        (Some(ent), Some(series)) => apply_series_overrides(ent, series).to_map(),
        (Some(ent), None) => ent.to_map(),
    }
}

/// Diffs `old_access` against `new_access` and hands a non-empty delta to the
/// processor registered for the entitlement type.
///
/// Series overrides are merged into both sides before diffing, so an override
/// matching the old value never shows up as a change. An empty delta returns
/// early without resolving a processor.
pub fn process_entitlement_delta(
    ctx: &Context,
    old_access: &AccessRecord,
    new_access: &AccessRecord,
    options: DeltaOptions,
) -> Result<EntitlementDelta, DeltaError> {
    let has_series = [old_access, new_access].iter().any(|a| {
        a.entitlement
            .as_ref()
            .is_some_and(|e| !e.series.is_empty())
    });
    let series = if options.series_overrides && has_series {
        Some(ctx.platform.platform()?.series)
    } else {
        None
    };

    let old_view = comparison_view(old_access, series.as_deref());
    let new_view = comparison_view(new_access, series.as_deref());
    let delta = EntitlementDelta {
        entitlement: dict_deltas(&old_view, &new_view),
    };
    if delta.is_empty() {
        return Ok(delta);
    }

    let Some(kind) = old_access.kind().or_else(|| delta.kind()) else {
        return Err(DeltaError::MissingType {
            old: old_access.to_value().to_string(),
            new: new_access.to_value().to_string(),
        });
    };
    let Some(processor) = ctx.processors.get(kind) else {
        return Err(DeltaError::UnsupportedType(kind.to_string()));
    };

    debug!(entitlement = kind, delta = %delta.to_value(), "processing contract deltas");
    processor.process_contract_deltas(old_access, &delta, options.allow_enable)?;
    Ok(delta)
}
