//! Report assembly: draft in, PDF bytes out.
//!
//! | Stage | Module |
//! |-------|--------|
//! | Story (sections, tables, keep-together groups) | [`sections`] |
//! | Pagination and text measurement | [`layout`] |
//! | PDF encoding | [`pdf`] |
//!
//! Assembly is pure and deterministic: the same draft and branding always
//! produce the same bytes. Saving to disk is a separate, optional step.

pub mod layout;
pub mod pdf;
pub mod sections;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::BrandingConfig;
use crate::models::ReportDraft;

/// Renders the draft to PDF bytes.
pub fn assemble(draft: &ReportDraft, branding: &BrandingConfig) -> Result<Vec<u8>> {
    let story = sections::compose(draft, branding);
    let pages = layout::paginate(&story);
    let title = format!("{} - {}", sections::REPORT_TITLE, draft.company_name);
    let bytes = pdf::encode(
        &pages,
        &pdf::PdfInfo {
            title: &title,
            author: &branding.provider_name,
            created: draft.generated_at,
        },
    )
    .with_context(|| format!("Failed to assemble report for {}", draft.company_name))?;
    debug!(pages = pages.len(), bytes = bytes.len(), "report assembled");
    Ok(bytes)
}

fn sanitize(part: &str) -> String {
    part.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// `<Company>_<Persona>_<YYYYmmdd_HHMMSS>.pdf`, safe for any filesystem.
pub fn report_filename(draft: &ReportDraft) -> String {
    format!(
        "{}_{}_{}.pdf",
        sanitize(&draft.company_name),
        sanitize(&draft.persona),
        draft.generated_at.format("%Y%m%d_%H%M%S")
    )
}

/// First path in `dir` named `name`, `name_2`, `name_3`, ... that does not exist.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{}", ext)),
        None => (name, String::new()),
    };
    (2u32..)
        .map(|n| dir.join(format!("{}_{}{}", stem, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Writes the artifact under `dir`, never overwriting an existing file.
pub fn save_report(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;
    let path = unique_path(dir, name);
    std::fs::write(&path, bytes)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Insight;
    use chrono::TimeZone;

    fn insight(id: &str, category: char, text: &str) -> Insight {
        Insight {
            question_id: id.to_string(),
            category,
            question_text: format!("How mature is area {}?", id),
            answer_text: "We are just getting started with a few pilots.".to_string(),
            insight_text: text.to_string(),
            failure: None,
        }
    }

    fn draft(insights: Vec<Insight>) -> ReportDraft {
        ReportDraft {
            company_name: "Acme Corp".to_string(),
            company_website: Some("https://acme.example".to_string()),
            persona: "Chief Technology Officer".to_string(),
            generated_at: chrono::Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap(),
            insights,
            synthesis: "Start with a literacy program.\n\nThen pilot two use cases.".to_string(),
        }
    }

    #[test]
    fn test_assemble_contains_sections_in_order() {
        let d = draft(vec![
            insight("E1", 'E', "Plan for scale."),
            insight("C1", 'C', "Invest in training."),
        ]);
        let bytes = assemble(&d, &BrandingConfig::default()).unwrap();
        let text = pdf::page_text(&bytes).unwrap().join("\n");

        let order = [
            "AI READINESS ASSESSMENT REPORT",
            "ACME CORP",
            "EXECUTIVE SUMMARY",
            "ASSESSMENT METHODOLOGY",
            "DETAILED ASSESSMENT FINDINGS",
            "CULTURE ASSESSMENT",
            "Invest in training.",
            "EVOLUTION ASSESSMENT",
            "Plan for scale.",
            "STRATEGIC RECOMMENDATIONS",
            "Then pilot two use cases.",
            "NEXT STEPS & ENGAGEMENT",
        ];
        let mut last = 0;
        for needle in order {
            let at = text[last..]
                .find(needle)
                .unwrap_or_else(|| panic!("{} missing or out of order", needle));
            last += at;
        }
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let d = draft(vec![insight("C1", 'C', "Same text.")]);
        let branding = BrandingConfig::default();
        assert_eq!(assemble(&d, &branding).unwrap(), assemble(&d, &branding).unwrap());
    }

    #[test]
    fn test_many_insights_paginate() {
        let long = "This insight is deliberately long so that items wrap across several lines of the page. ".repeat(4);
        let insights: Vec<Insight> = (1..=24)
            .map(|i| insight(&format!("{}{}", ['C', 'A', 'R', 'E'][i % 4], i), ['C', 'A', 'R', 'E'][i % 4], &long))
            .collect();
        let bytes = assemble(&draft(insights), &BrandingConfig::default()).unwrap();
        let pages = pdf::page_text(&bytes).unwrap();
        assert!(pages.len() > 5);
        let total = pages.len();
        assert!(pages[total - 1].contains(&format!("Page {} of {}", total, total)));
    }

    #[test]
    fn test_empty_insights_still_renders() {
        let bytes = assemble(&draft(vec![]), &BrandingConfig::default()).unwrap();
        let text = pdf::page_text(&bytes).unwrap().join("\n");
        assert!(text.contains("No assessment responses were provided."));
        assert!(text.contains("STRATEGIC RECOMMENDATIONS"));
    }

    #[test]
    fn test_report_filename_sanitizes() {
        let mut d = draft(vec![]);
        d.company_name = "Acme / Ünited, Inc.".to_string();
        d.persona = "CTO".to_string();
        assert_eq!(report_filename(&d), "Acme____nited__Inc__CTO_20260506_070809.pdf");
    }

    #[test]
    fn test_save_report_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let first = save_report(dir.path(), "r.pdf", b"one").unwrap();
        let second = save_report(dir.path(), "r.pdf", b"two").unwrap();
        assert_eq!(first.file_name().unwrap(), "r.pdf");
        assert_eq!(second.file_name().unwrap(), "r_2.pdf");
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }
}
