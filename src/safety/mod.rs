//! SQL Safety Classification
//!
//! Two lexical checks gate every statement before it reaches a connection:
//!
//! 1. A blanket denylist of suspicious patterns (comment markers, statement
//!    separators, a tautology shape, destructive keyword pairs and a shell
//!    escape). It runs unconditionally.
//! 2. A read-only keyword prefix test, applied only when the caller asks for a
//!    read-only call or the server runs in global read-only mode.
//!
//! # Validation Strategy
//! - Raw text only, no parsing
//! - Coarse on purpose: a literal `;` or `--` inside a string constant is
//!   rejected, and obfuscated payloads can slip past the denylist
//! - A prefix of `SELECT` says nothing about vendor extensions that write

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Keywords accepted by the read-only prefix test (after trim + upper-case)
pub const READ_ONLY_PREFIXES: &[&str] = &["SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN"];

/// Substrings rejected anywhere in the lower-cased statement
const DENIED_FRAGMENTS: &[&str] = &[
    "--",
    ";",
    "union select",
    "drop table",
    "drop database",
    "truncate table",
    "delete from",
    "insert into",
    "xp_cmdshell",
];

/// Whole-text tautology shape (`... or 1...`, `... or '...`).
///
/// The leading and trailing runs stop at any line terminator (`\n`, `\r`,
/// NEL, LINE SEPARATOR, PARAGRAPH SEPARATOR) and the whitespace class is ASCII
/// only, so a statement split over several lines only matches when the `or`
/// sits next to the line breaks. That leniency is part of the observable
/// behaviour.
const TAUTOLOGY_PATTERN: &str = r#"^[^\n\r\x{85}\x{2028}\x{2029}]*[ \t\n\x0B\x0C\r]+or[ \t\n\x0B\x0C\r]+['"0-9][^\n\r\x{85}\x{2028}\x{2029}]*$"#;

fn tautology_regex() -> &'static Regex {
    static TAUTOLOGY: OnceLock<Regex> = OnceLock::new();
    TAUTOLOGY.get_or_init(|| Regex::new(TAUTOLOGY_PATTERN).expect("tautology pattern is valid"))
}

/// Why a statement was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The denylist matched
    SuspiciousPattern,
    /// A read-only call carried a statement outside the prefix allowlist
    WriteNotAllowed,
}

impl DenialReason {
    /// Short title shown to the client
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::SuspiciousPattern => "Security violation",
            Self::WriteNotAllowed => "Write operation not allowed",
        }
    }

    /// Longer explanation shown after the title
    #[must_use]
    pub const fn explanation(self) -> &'static str {
        match self {
            Self::SuspiciousPattern => "Possible SQL injection detected",
            Self::WriteNotAllowed => "Query appears to modify data but readonly=true",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title(), self.explanation())
    }
}

/// Outcome of [`classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied(DenialReason),
}

impl Verdict {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Classify a statement.
///
/// The denylist is consulted first and wins regardless of mode. The prefix
/// test runs when `per_call_readonly` or `global_readonly_mode` is set; with
/// neither, any statement that clears the denylist is allowed.
#[must_use]
pub fn classify(sql: &str, per_call_readonly: bool, global_readonly_mode: bool) -> Verdict {
    if contains_suspicious_pattern(sql) {
        return Verdict::Denied(DenialReason::SuspiciousPattern);
    }

    if (per_call_readonly || global_readonly_mode) && !is_read_only_statement(sql) {
        return Verdict::Denied(DenialReason::WriteNotAllowed);
    }

    Verdict::Allowed
}

/// Keyword prefix test: `SELECT`, `WITH`, `SHOW`, `DESCRIBE`, `DESC`, `EXPLAIN`.
///
/// Plain prefix match, so `SELECTED_ROWS` passes as well.
#[must_use]
pub fn is_read_only_statement(sql: &str) -> bool {
    let upper = sql.trim().to_uppercase();
    READ_ONLY_PREFIXES.iter().any(|prefix| upper.starts_with(prefix))
}

/// Case-insensitive denylist check
#[must_use]
pub fn contains_suspicious_pattern(sql: &str) -> bool {
    let lower = sql.to_lowercase();

    DENIED_FRAGMENTS.iter().any(|fragment| lower.contains(fragment))
        || tautology_regex().is_match(&lower)
}
