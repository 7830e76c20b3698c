//! Credential redaction for URLs that end up in logs and event payloads.

use std::sync::LazyLock;

use regex::Regex;

static SECRET_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([?&](?:api[_-]?key|token|key|secret|password)=)[^&#]+")
        .expect("redaction pattern is valid")
});

/// Replace credential-bearing query parameter values with `[REDACTED]`.
pub fn redact_url(url: &str) -> String {
    SECRET_PARAM.replace_all(url, "${1}[REDACTED]").into_owned()
}
