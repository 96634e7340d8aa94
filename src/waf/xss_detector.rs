use log::{debug, error};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::panic;

use super::{DetectionResult, Detector};
use crate::rules::RequestFact;

pub const XSS_TITLE: &str = "XSS injection";
pub const XSS_CONTENT: &str = "Please access the site correctly";
pub const XSS_RISK_LEVEL: i64 = 2;

static XSS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Script tags
        Regex::new(r"(?i)<script[^>]*>").unwrap(),
        Regex::new(r"(?i)</script>").unwrap(),
        // Event handlers inside markup
        Regex::new(r#"(?i)[\s"'/;]on[a-z]+\s*="#).unwrap(),
        // JavaScript protocol
        Regex::new(r"(?i)javascript:\s*\w").unwrap(),
        Regex::new(r"(?i)vbscript:\s*\w").unwrap(),
        // Dangerous tags
        Regex::new(r"(?i)<iframe[^>]*>").unwrap(),
        Regex::new(r"(?i)<object[^>]*>").unwrap(),
        Regex::new(r"(?i)<embed[^>]*>").unwrap(),
        Regex::new(r"(?i)<svg[^>]*\bon[a-z]+").unwrap(),
        Regex::new(r"(?i)<img[^>]*\bon[a-z]+").unwrap(),
        Regex::new(r"(?i)<body[^>]*\bon[a-z]+").unwrap(),
        // JavaScript functions
        Regex::new(r"(?i)\beval\s*\(").unwrap(),
        Regex::new(r"(?i)\balert\s*\(").unwrap(),
        Regex::new(r"(?i)expression\s*\(").unwrap(),
        // Data URLs with markup
        Regex::new(r"(?i)data:text/html").unwrap(),
    ]
});

/// Regex analyzer over URL-decoded input.
pub fn is_xss(input: &str) -> bool {
    if input.len() < 3 {
        return false;
    }

    let decoded = urlencoding::decode(input).unwrap_or(Cow::Borrowed(input));
    XSS_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(&decoded))
}

/// Run `analyze`, treating a panic as a negative verdict.
fn guarded(analyze: fn(&str) -> bool, input: &str) -> bool {
    panic::catch_unwind(|| analyze(input)).unwrap_or_else(|_| {
        error!("XSS analyzer panicked, treating input as clean");
        false
    })
}

pub struct XssDetector {
    pub enabled: bool,
    /// Let a hit in an individual form value block the request. When off,
    /// such hits are only logged.
    pub escalate_form_fields: bool,
    analyzer: fn(&str) -> bool,
}

impl Default for XssDetector {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl XssDetector {
    pub fn new(enabled: bool, escalate_form_fields: bool) -> Self {
        Self {
            enabled,
            escalate_form_fields,
            analyzer: is_xss,
        }
    }

    /// Check the URL and raw form body of `fact`, then each decoded form
    /// value. A hit marks the fact with risk level 2 and blocks.
    pub fn check_xss(&self, fact: &mut RequestFact, form_values: &[(String, String)]) -> DetectionResult {
        if !self.enabled {
            return DetectionResult::pass(Detector::Xss);
        }

        let mut flagged = guarded(self.analyzer, &fact.url) || guarded(self.analyzer, &fact.post_form);

        if !flagged {
            for (name, value) in form_values {
                if guarded(self.analyzer, value) {
                    debug!("XSS signal in form field {}", name);
                    if self.escalate_form_fields {
                        flagged = true;
                        break;
                    }
                }
            }
        }

        if flagged {
            fact.risk_level = XSS_RISK_LEVEL;
            return DetectionResult::block(Detector::Xss, XSS_TITLE, XSS_CONTENT);
        }
        DetectionResult::pass(Detector::Xss)
    }
}
