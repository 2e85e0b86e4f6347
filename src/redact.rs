use std::sync::LazyLock;

use regex::Regex;

const REDACTED: &str = "<REDACTED>";

static SENSITIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(Bearer\s+)[^\s'\x22,]+",
        r#"("(?:machineToken|resourceToken|contractToken|token)"\s*:\s*")[^"]+"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid redaction pattern"))
    .collect()
});

/// Masks bearer tokens and token-valued JSON fields before they reach the log.
pub fn redact_sensitive(raw: &str) -> String {
    let mut out = raw.to_string();
    for re in SENSITIVE_PATTERNS.iter() {
        out = re.replace_all(&out, format!("${{1}}{REDACTED}")).into_owned();
    }
    out
}
