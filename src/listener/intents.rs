//! Spoken shutdown-intent detection over pipeline transcripts.
//!
//! Deterministic hotword matching, not NLU: a broad but sane set of shutdown
//! phrases, negation guards, and an optional confirmation step with a bounded
//! window.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// How long a detected intent waits for spoken confirmation before expiring.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(15);

fn shutdown_hotwords() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(shut\s*down|shutdown|power\s*off|turn\s*off|stop\s+listening|stop\s+the\s+server|stop\s+server|exit|quit|terminate|end\s+(?:session|process|server)|kill\b.*\bserver\b)\b",
        )
        .expect("shutdown hotword pattern is valid")
    })
}

fn negations() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(don't|do\s+not|not\s+now|cancel|false\s+alarm)\b")
            .expect("negation pattern is valid")
    })
}

fn confirm_hotwords() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(confirm(?:ed)?\s+(?:shut\s*down|shutdown|exit|quit)|yes[, ]*(?:shut\s*down|exit)|go\s+ahead)\b",
        )
        .expect("confirm hotword pattern is valid")
    })
}

/// True when the transcript asks to stop listening, with no negation.
pub fn intent_shutdown(text: &str) -> bool {
    if negations().is_match(text) {
        return false;
    }
    shutdown_hotwords().is_match(text)
}

/// True when the transcript confirms a pending shutdown, with no negation.
pub fn intent_confirm(text: &str) -> bool {
    if negations().is_match(text) {
        return false;
    }
    confirm_hotwords().is_match(text)
}
