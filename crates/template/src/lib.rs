//! Submission classification and template validation.
//!
//! Exactly two submission grammars exist, selected by a literal content
//! marker: texts carrying the report marker use the Report field set,
//! everything else uses the Recommendation field set. [`classify`] is the
//! single source of truth for that choice — grammar selection and channel
//! routing both consume it, so the two can never disagree for the same input.
//!
//! Validation is two-phase, and the phases intentionally use different
//! matching strategies:
//!
//! 1. **Presence**: a required field counts as present if its name appears
//!    anywhere in the text (plain substring, not anchored to a colon), so a
//!    trailing label without a value still passes this phase.
//! 2. **Emptiness**: for lines that start with `<field><colon>` — where the
//!    colon may be any of the recognized full-width, half-width, vertical,
//!    or small glyphs — the remainder of the line is the value; a blank
//!    trimmed value flags the field as empty.
//!
//! A field can therefore pass presence and still be flagged empty. Both
//! phases must stay exactly as they are; downstream messages depend on the
//! distinction.

use serde::{Deserialize, Serialize};

/// Literal marker that selects the Report grammar (and the report channel).
pub const REPORT_MARKER: &str = "吃🐔雷报";

/// Colon glyphs recognized between a field label and its value.
pub const COLON_VARIANTS: [char; 4] = ['：', ':', '︓', '﹕'];

/// Required fields of the Report grammar.
pub const REPORT_FIELDS: [&str; 9] = [
    "老师花名",
    "联系方式",
    "时间",
    "地址",
    "花费",
    "样貌身材",
    "经历",
    "验证留名",
    "出击证明",
];

/// Required fields of the Recommendation grammar.
pub const RECOMMEND_FIELDS: [&str; 6] = ["老师花名", "联系方式", "价格", "地址", "评价", "服务"];

/// The two submission grammars / routing destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Report,
    Recommendation,
}

impl SubmissionKind {
    /// Required field names for this grammar.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            SubmissionKind::Report => &REPORT_FIELDS,
            SubmissionKind::Recommendation => &RECOMMEND_FIELDS,
        }
    }
}

/// Classify a submission body by its content marker.
pub fn classify(text: &str) -> SubmissionKind {
    if text.contains(REPORT_MARKER) {
        SubmissionKind::Report
    } else {
        SubmissionKind::Recommendation
    }
}

/// Outcome of template validation. Pure value, no identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// The body was empty or whitespace-only.
    pub empty_body: bool,
    /// Required fields whose names never appear in the text.
    pub missing_fields: Vec<String>,
    /// Fields present as a line label but with a blank value.
    pub empty_fields: Vec<String>,
}

impl ValidationResult {
    fn valid() -> Self {
        Self {
            is_valid: true,
            empty_body: false,
            missing_fields: Vec::new(),
            empty_fields: Vec::new(),
        }
    }

    fn empty_body() -> Self {
        Self {
            is_valid: false,
            empty_body: true,
            missing_fields: Vec::new(),
            empty_fields: Vec::new(),
        }
    }
}

/// Validate `text` against the grammar selected by its own marker.
pub fn validate(text: &str) -> ValidationResult {
    if text.trim().is_empty() {
        return ValidationResult::empty_body();
    }
    validate_as(text, classify(text))
}

/// Validate `text` against an explicit grammar.
pub fn validate_as(text: &str, kind: SubmissionKind) -> ValidationResult {
    if text.trim().is_empty() {
        return ValidationResult::empty_body();
    }

    let required = kind.required_fields();

    // Phase 1: presence, substring-anywhere.
    let missing_fields: Vec<String> = required
        .iter()
        .filter(|field| !text.contains(**field))
        .map(|field| field.to_string())
        .collect();
    if !missing_fields.is_empty() {
        return ValidationResult {
            is_valid: false,
            empty_body: false,
            missing_fields,
            empty_fields: Vec::new(),
        };
    }

    // Phase 2: emptiness, line-prefix with a colon glyph.
    let mut empty_fields = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        for field in required {
            if let Some(value) = field_value(line, field) {
                if value.trim().is_empty() && !empty_fields.contains(&field.to_string()) {
                    empty_fields.push(field.to_string());
                }
                break;
            }
        }
    }

    if empty_fields.is_empty() {
        ValidationResult::valid()
    } else {
        ValidationResult {
            is_valid: false,
            empty_body: false,
            missing_fields: Vec::new(),
            empty_fields,
        }
    }
}

/// If `line` starts with `<field><colon-variant>`, return the raw value part.
fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    let colon = rest.chars().next()?;
    if COLON_VARIANTS.contains(&colon) {
        Some(&rest[colon.len_utf8()..])
    } else {
        None
    }
}
