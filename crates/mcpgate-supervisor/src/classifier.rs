//! Stderr/stdout error classification.
//!
//! Bridges and the MCP servers behind them write a lot of noise. The
//! classifier filters known startup chatter, extracts the most useful
//! message from a line or buffered block, and assigns it an [`ErrorKind`]
//! so the supervisor can decide between restart, fallback, and surfacing.

use std::sync::LazyLock;

use mcpgate_core::ErrorKind;
use regex::Regex;

/// A classified error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub message: String,
    pub kind: ErrorKind,
}

static INFORMATIONAL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\s*INFO[:\s]",
        r"Uvicorn running on",
        r"^\s*Installed \d+ package",
        r"^\s*Downloading .+\(",
        r"^\s*Resolved \d+ package",
        r"Application startup complete",
        r"^\s*Started server process",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

/// Prioritized message extractors; the first capture wins.
static EXTRACTORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"ERROR:\s*(.+)",
        r"Error:\s*(.+)",
        r"Exception:\s*(.+)",
        r"(Missing required.+)",
        r"(?i)([^\r\n]*\bAPI key\b[^\r\n]*)",
        r"(?i)(Please enter your .+)",
        r"(Child exited:\s*.+)",
        r"(Failed to .+)",
        r"(Unable to .+)",
        r"(Cannot .+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

/// Keywords that rescue a line when no extractor fires.
const CRITICAL_KEYWORDS: &[&str] = &[
    "killed",
    "crashed",
    "terminated",
    "refused",
    "timeout",
    "unauthorized",
    "forbidden",
];

/// Leading timestamp / bracket noise stripped before extraction.
static LOG_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\[[^\]]*\]\s*|\d{4}-\d{2}-\d{2}[T ][\d:.,]+Z?\s*)+").expect("static regex")
});

/// Classify one stderr/stdout line. Returns `None` for informational output.
#[must_use]
pub fn classify_line(line: &str) -> Option<Classified> {
    let trimmed = line.trim();
    if trimmed.is_empty() || is_informational(trimmed) {
        return None;
    }

    let stripped = LOG_PREFIX.replace(trimmed, "");
    let message = extract_message(&stripped)?;
    let kind = classify_message(&message);
    Some(Classified { message, kind })
}

/// Classify a buffered multi-line block, scanning line by line.
#[must_use]
pub fn classify_block(block: &str) -> Option<Classified> {
    block.lines().find_map(classify_line)
}

/// Classify a child exit code into an error record message.
#[must_use]
pub fn classify_exit_code(code: i32) -> Classified {
    let (kind, message) = match code {
        137 => (
            ErrorKind::Resource,
            "process killed (exit 137, likely out of memory)".to_string(),
        ),
        126 => (
            ErrorKind::Config,
            "command found but not executable (exit 126)".to_string(),
        ),
        127 => (
            ErrorKind::Dependency,
            "command not found (exit 127)".to_string(),
        ),
        other => (
            ErrorKind::Runtime,
            format!("process exited with code {other}"),
        ),
    };
    Classified { message, kind }
}

fn is_informational(line: &str) -> bool {
    INFORMATIONAL.iter().any(|re| re.is_match(line))
}

fn extract_message(line: &str) -> Option<String> {
    for re in EXTRACTORS.iter() {
        if let Some(captures) = re.captures(line) {
            if let Some(capture) = captures.get(1) {
                let message = capture.as_str().trim();
                if !message.is_empty() {
                    return Some(message.to_string());
                }
            }
        }
    }

    let lower = line.to_ascii_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Some(line.trim().to_string());
    }

    None
}

/// Keyword families evaluated in order; first hit wins.
fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();

    const AUTH: &[&str] = &[
        "api key",
        "token",
        "password",
        "unauthorized",
        "forbidden",
        "401",
        "403",
    ];
    const CONNECTION: &[&str] = &[
        "connection",
        "network",
        "refused",
        "timeout",
        "socket",
        "mcperror",
    ];
    const RESOURCE: &[&str] = &["memory", "killed", "137", "sigkill", "oom"];
    const DEPENDENCY: &[&str] = &["package", "install", "module", "import"];
    const CONFIG: &[&str] = &["missing", "required", "invalid"];

    if AUTH.iter().any(|kw| lower.contains(kw)) {
        ErrorKind::Auth
    } else if CONNECTION.iter().any(|kw| lower.contains(kw)) {
        ErrorKind::Connection
    } else if RESOURCE.iter().any(|kw| lower.contains(kw)) {
        ErrorKind::Resource
    } else if DEPENDENCY.iter().any(|kw| lower.contains(kw)) {
        ErrorKind::Dependency
    } else if CONFIG.iter().any(|kw| lower.contains(kw)) {
        ErrorKind::Config
    } else {
        ErrorKind::Runtime
    }
}
