use crate::models::api::UpdatePayload;

pub const MAX_ID_CHARS: usize = 64;
pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_COURSE_NUMBER: u32 = 999;
pub const MAX_TAGS: usize = 16;

/// Substrings that get a submission rejected outright. Matching is done on
/// the lowercased text.
const INJECTION_MARKERS: &[&str] = &[
    "<script",
    "</script",
    "javascript:",
    "onerror=",
    "onload=",
    "<iframe",
    "data:text/html",
    "../",
    "..\\",
];

/// Structural and content checks applied before any knowledge mutation.
/// Structural findings map to 400 responses, screening findings to 403.
pub struct SecurityValidator {
    max_content_chars: usize,
}

impl SecurityValidator {
    pub fn new(max_content_chars: usize) -> Self {
        Self { max_content_chars }
    }

    /// Shape checks on a submitted source. Returns every finding rather than
    /// stopping at the first so the client can fix them in one pass.
    pub fn validate_fields(&self, payload: &UpdatePayload) -> Vec<String> {
        let mut findings = Vec::new();

        if payload.id.is_empty() {
            findings.push("id must not be empty".to_string());
        } else if payload.id.chars().count() > MAX_ID_CHARS {
            findings.push(format!("id exceeds {} characters", MAX_ID_CHARS));
        } else if !payload.id.chars().all(is_id_char) {
            findings.push(
                "id may only contain lowercase letters, digits, '-' and '_'".to_string()
            );
        }

        if payload.title.trim().is_empty() {
            findings.push("title must not be empty".to_string());
        } else if payload.title.chars().count() > MAX_TITLE_CHARS {
            findings.push(format!("title exceeds {} characters", MAX_TITLE_CHARS));
        }

        if payload.content.trim().is_empty() {
            findings.push("content must not be empty".to_string());
        } else if payload.content.chars().count() > self.max_content_chars {
            findings.push(format!("content exceeds {} characters", self.max_content_chars));
        }

        if payload.course_number == 0 || payload.course_number > MAX_COURSE_NUMBER {
            findings.push(format!("courseNumber must be between 1 and {}", MAX_COURSE_NUMBER));
        }
        if payload.module_number == 0 || payload.module_number > MAX_COURSE_NUMBER {
            findings.push(format!("moduleNumber must be between 1 and {}", MAX_COURSE_NUMBER));
        }

        if payload.tags.len() > MAX_TAGS {
            findings.push(format!("at most {} tags are allowed", MAX_TAGS));
        }

        findings
    }

    /// Screens every free-text field of a submitted source for injection
    /// markers and raw control characters.
    pub fn screen_source(&self, payload: &UpdatePayload) -> Vec<String> {
        let mut findings = Vec::new();
        findings.extend(screen_text("title", &payload.title));
        findings.extend(screen_text("content", &payload.content));
        for tag in &payload.tags {
            findings.extend(screen_text("tag", tag));
        }
        findings
    }

    /// Same screening for incoming chat messages.
    pub fn screen_message(&self, message: &str) -> Vec<String> {
        screen_text("message", message)
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
}

fn screen_text(label: &str, text: &str) -> Vec<String> {
    let mut findings = Vec::new();

    if text.contains('\0') {
        findings.push(format!("{} contains a NUL byte", label));
    }
    if text.chars().any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t') {
        findings.push(format!("{} contains control characters", label));
    }

    let lowered = text.to_lowercase();
    for marker in INJECTION_MARKERS {
        if lowered.contains(marker) {
            findings.push(format!("{} contains the disallowed sequence '{}'", label, marker));
        }
    }

    findings
}
