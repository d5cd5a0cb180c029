// Heuristic scan of worker output for status keywords. Advisory only:
// the status document is the single source of truth for task state, this
// just gives the event stream earlier hints and rate-limit warnings.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// What a matched output line suggests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    TaskComplete,
    ErrorReported,
    RateLimited,
}

/// A keyword hit in one output line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSignal {
    pub kind: SignalKind,
    pub matched: String,
}

struct CompiledPattern {
    regex: Regex,
    kind: SignalKind,
}

static PATTERNS: OnceLock<Vec<CompiledPattern>> = OnceLock::new();

fn get_patterns() -> &'static Vec<CompiledPattern> {
    PATTERNS.get_or_init(|| {
        vec![
            // Rate limits first: a rate-limit line often also contains "error"
            CompiledPattern {
                regex: Regex::new(r"(?i)rate[_\-\s]?limit(ed|ing)?").unwrap(),
                kind: SignalKind::RateLimited,
            },
            CompiledPattern {
                regex: Regex::new(r"(?i)too\s+many\s+requests").unwrap(),
                kind: SignalKind::RateLimited,
            },
            CompiledPattern {
                regex: Regex::new(r"(?i)quota\s*(exceeded|limit)").unwrap(),
                kind: SignalKind::RateLimited,
            },
            CompiledPattern {
                regex: Regex::new(r"(?i)\b429\b").unwrap(),
                kind: SignalKind::RateLimited,
            },
            // Completion phrasing
            CompiledPattern {
                regex: Regex::new(r"(?i)task\s+\S+\s+(complete|completed|done)").unwrap(),
                kind: SignalKind::TaskComplete,
            },
            CompiledPattern {
                regex: Regex::new(r"(?i)all\s+tasks?\s+(complete|completed|done)").unwrap(),
                kind: SignalKind::TaskComplete,
            },
            // Error phrasing
            CompiledPattern {
                regex: Regex::new(r"(?i)(fatal|panic|unrecoverable)").unwrap(),
                kind: SignalKind::ErrorReported,
            },
            CompiledPattern {
                regex: Regex::new(r"(?i)error[:\s]").unwrap(),
                kind: SignalKind::ErrorReported,
            },
        ]
    })
}

/// Scan one output line. Returns the first matching signal, if any.
pub fn scan_line(line: &str) -> Option<OutputSignal> {
    for pattern in get_patterns() {
        if let Some(m) = pattern.regex.find(line) {
            return Some(OutputSignal {
                kind: pattern.kind,
                matched: m.as_str().to_string(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_task_completion() {
        let signal = scan_line("Task t3 complete, moving on").unwrap();
        assert_eq!(signal.kind, SignalKind::TaskComplete);
    }

    #[test]
    fn test_detects_rate_limit_over_error() {
        // A rate-limit error line classifies as rate limit, not error
        let signal = scan_line("error: rate limit exceeded, retry later").unwrap();
        assert_eq!(signal.kind, SignalKind::RateLimited);
    }

    #[test]
    fn test_detects_http_429() {
        let signal = scan_line("HTTP 429 Too Many Requests").unwrap();
        assert_eq!(signal.kind, SignalKind::RateLimited);
    }

    #[test]
    fn test_detects_error() {
        let signal = scan_line("error: failed to compile src/lib.rs").unwrap();
        assert_eq!(signal.kind, SignalKind::ErrorReported);
    }

    #[test]
    fn test_ordinary_output_matches_nothing() {
        assert!(scan_line("Reading file src/main.rs").is_none());
        assert!(scan_line("running 12 tests").is_none());
    }
}
