//! Core data models used throughout the report pipeline.
//!
//! These types represent the documents, chunks, answers, insights and
//! delivery records that flow from acquisition through to delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Result of an operation that may degrade instead of failing.
///
/// `Degraded` still carries a usable value, so callers can proceed while
/// knowing (and reporting) that the value is a fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Degraded { reason: String, fallback: T },
}

impl<T> Outcome<T> {
    pub fn degraded(reason: impl Into<String>, fallback: T) -> Self {
        Outcome::Degraded {
            reason: reason.into(),
            fallback,
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Ok(v) => v,
            Outcome::Degraded { fallback, .. } => fallback,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Ok(v) => v,
            Outcome::Degraded { fallback, .. } => fallback,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(v) => Outcome::Ok(f(v)),
            Outcome::Degraded { reason, fallback } => Outcome::Degraded {
                reason,
                fallback: f(fallback),
            },
        }
    }
}

/// Cleaned page text produced by the acquirer. Never empty: a failed
/// acquisition carries a placeholder sentence naming the URL.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub text: String,
    pub source_url: String,
    pub retrieved_at: DateTime<Utc>,
}

/// A retrievable segment of source text with provenance metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
}

/// A ranked match returned by the retrieval index.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub namespace: String,
    pub score: f32,
}

// ============ Survey ============

/// The four assessment dimensions, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Culture,
    Adoption,
    Readiness,
    Evolution,
    Other(char),
}

impl Category {
    pub const ORDERED: [Category; 4] = [
        Category::Culture,
        Category::Adoption,
        Category::Readiness,
        Category::Evolution,
    ];

    pub fn from_char(c: char) -> Self {
        match c.to_ascii_uppercase() {
            'C' => Category::Culture,
            'A' => Category::Adoption,
            'R' => Category::Readiness,
            'E' => Category::Evolution,
            other => Category::Other(other),
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Category::Culture => 'C',
            Category::Adoption => 'A',
            Category::Readiness => 'R',
            Category::Evolution => 'E',
            Category::Other(c) => *c,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Category::Culture => "Culture".to_string(),
            Category::Adoption => "Adoption".to_string(),
            Category::Readiness => "Readiness".to_string(),
            Category::Evolution => "Evolution".to_string(),
            Category::Other(c) => format!("Category {}", c),
        }
    }

    /// Sort key: the four known dimensions first, unknown ones after.
    pub fn rank(&self) -> usize {
        match self {
            Category::Culture => 0,
            Category::Adoption => 1,
            Category::Readiness => 2,
            Category::Evolution => 3,
            Category::Other(_) => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurveyAnswer {
    pub question_id: String,
    pub category: char,
    pub question_text: String,
    pub answer_text: String,
}

impl SurveyAnswer {
    pub fn category(&self) -> Category {
        Category::from_char(self.category)
    }
}

/// Generated narrative for one answer. When generation failed,
/// `insight_text` holds the diagnostic shown in the report and `failure`
/// records the reason.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Insight {
    pub question_id: String,
    pub category: char,
    pub question_text: String,
    pub answer_text: String,
    pub insight_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Everything the document assembler needs. Timestamps live here so that
/// assembly itself stays deterministic.
#[derive(Debug, Clone)]
pub struct ReportDraft {
    pub company_name: String,
    pub company_website: Option<String>,
    pub persona: String,
    pub generated_at: DateTime<Utc>,
    pub insights: Vec<Insight>,
    pub synthesis: String,
}

// ============ Requests and outcomes ============

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub company_name: String,
    #[serde(default)]
    pub company_website: Option<String>,
    pub persona: String,
    pub answers: Vec<SurveyAnswer>,
    #[serde(default)]
    pub recipient_email: Option<String>,
    #[serde(default)]
    pub client: ClientInfo,
}

impl ReportRequest {
    /// Requests that cannot produce a meaningful report.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.company_name.trim().is_empty() {
            anyhow::bail!("company_name must not be empty");
        }
        if self.answers.is_empty() {
            anyhow::bail!("at least one survey answer is required");
        }
        Ok(())
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient_email
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Terminal record of one pipeline run. Each status field is set
/// independently of the others.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub report_id: String,
    pub artifact_bytes: Vec<u8>,
    pub artifact_name: String,
    pub artifact_path: Option<PathBuf>,
    pub email_sent: bool,
    pub email_status: String,
    pub lead_logged: bool,
    /// Set when the recommendations section carries a diagnostic instead of
    /// a generated narrative.
    pub synthesis_failure: Option<String>,
}
