//! Prompt builders for per-question insights and the closing synthesis.
//!
//! Both prompts are plain text. Optional context sections are omitted
//! entirely when empty so the model never sees a dangling header.

use std::fmt::Write;

use crate::models::Category;

pub struct InsightPrompt<'a> {
    pub persona: &'a str,
    pub company_name: &'a str,
    pub category: Category,
    pub question: &'a str,
    pub answer: &'a str,
    /// Text acquired from the company's own site.
    pub company_background: Option<&'a str>,
    /// Knowledge-base snippets, most relevant first.
    pub knowledge: &'a [String],
}

pub struct SynthesisPrompt<'a> {
    pub provider_name: &'a str,
    pub insights: &'a [String],
    pub company_text: Option<&'a str>,
    pub service_context: &'a [String],
}

pub fn build_insight_prompt(p: &InsightPrompt<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are a seasoned AI strategy consultant advising the {} of {}. \
         They just answered one question of an AI readiness assessment that \
         covers four dimensions: Culture, Adoption, Readiness and Evolution.",
        p.persona, p.company_name
    );
    out.push('\n');
    let _ = writeln!(out, "Assessment dimension: {}", p.category.label());
    let _ = writeln!(out, "Question: {}", p.question);
    let _ = writeln!(out, "Their answer: {}", p.answer);

    if let Some(background) = p.company_background.filter(|b| !b.trim().is_empty()) {
        out.push('\n');
        let _ = writeln!(out, "Company background:\n{}", background.trim());
    }
    if !p.knowledge.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "Relevant reference material:\n{}", p.knowledge.join("\n"));
    }

    out.push('\n');
    out.push_str(
        "Write a 3-4 sentence insight addressed directly to them (\"you\", \"your\") that:\n\
         - describes the current situation their answer implies\n\
         - names the most important risk or gap it creates\n\
         - gives one practical recommendation that fits their role\n\
         No greetings, no disclaimers, no preamble. Return only the insight text.",
    );
    out
}

pub fn build_synthesis_prompt(p: &SynthesisPrompt<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "You are a solutions consultant at {}.", p.provider_name);
    out.push('\n');

    out.push_str("A client received these AI readiness insights:\n");
    if p.insights.is_empty() {
        out.push_str("(no individual insights were available)\n");
    } else {
        for insight in p.insights {
            let _ = writeln!(out, "- {}", insight.trim());
        }
    }
    out.push('\n');

    match p.company_text.filter(|t| !t.trim().is_empty()) {
        Some(text) => {
            let _ = writeln!(out, "Extract from the client's website:\n{}", text.trim());
        }
        None => out.push_str("No website extract is available for this client.\n"),
    }
    out.push('\n');

    let _ = writeln!(
        out,
        "Services and capabilities {} actually offers:\n{}",
        p.provider_name,
        p.service_context.join("\n")
    );
    out.push('\n');

    out.push_str(
        "Write a 7-8 sentence recommendation addressed directly to the client \
         (\"you\", \"your\") that:\n\
         - explains how the services above address the specific gaps in the insights\n\
         - mentions only capabilities listed above, never invented ones\n\
         - sets concrete expectations for the next steps\n\
         - describes realistic improvements over the next 2-3 years\n\
         Avoid jargon and inflated promises. Start directly with the core message.",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insight_prompt_sections() {
        let knowledge = vec!["We run literacy workshops.".to_string()];
        let prompt = build_insight_prompt(&InsightPrompt {
            persona: "CTO",
            company_name: "Acme",
            category: Category::Culture,
            question: "Is AI training offered?",
            answer: "No training offered",
            company_background: Some("Acme builds rockets."),
            knowledge: &knowledge,
        });
        assert!(prompt.contains("the CTO of Acme"));
        assert!(prompt.contains("Assessment dimension: Culture"));
        assert!(prompt.contains("Their answer: No training offered"));
        assert!(prompt.contains("Company background:\nAcme builds rockets."));
        assert!(prompt.contains("We run literacy workshops."));
        assert!(prompt.contains("3-4 sentence"));
    }

    #[test]
    fn test_insight_prompt_omits_empty_sections() {
        let prompt = build_insight_prompt(&InsightPrompt {
            persona: "CEO",
            company_name: "Acme",
            category: Category::Other('X'),
            question: "q",
            answer: "a",
            company_background: Some("   "),
            knowledge: &[],
        });
        assert!(!prompt.contains("Company background"));
        assert!(!prompt.contains("reference material"));
        assert!(prompt.contains("Category X"));
    }

    #[test]
    fn test_synthesis_prompt_without_insights() {
        let services = vec!["AI training programs.".to_string()];
        let prompt = build_synthesis_prompt(&SynthesisPrompt {
            provider_name: "Readiness Partners",
            insights: &[],
            company_text: None,
            service_context: &services,
        });
        assert!(prompt.contains("no individual insights were available"));
        assert!(prompt.contains("No website extract"));
        assert!(prompt.contains("AI training programs."));
        assert!(prompt.contains("7-8 sentence"));
    }
}
