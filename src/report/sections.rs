//! Report story: the ordered blocks that make up each section.
//!
//! [`compose`] is a pure function of the draft and branding. Layout and
//! encoding happen later ([`super::layout`], [`super::pdf`]).

use crate::config::BrandingConfig;
use crate::models::{Category, Insight, ReportDraft};

pub const REPORT_TITLE: &str = "AI READINESS ASSESSMENT REPORT";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color(pub f32, pub f32, pub f32);

pub const NAVY: Color = Color(0.04, 0.19, 0.38);
pub const AMBER: Color = Color(1.0, 0.65, 0.0);
pub const TEAL: Color = Color(0.0, 0.5, 0.5);
pub const LIGHT_GRAY: Color = Color(0.95, 0.95, 0.95);
pub const RULE_GRAY: Color = Color(0.8, 0.8, 0.8);
pub const TEXT: Color = Color(0.2, 0.2, 0.2);
pub const WHITE: Color = Color(1.0, 1.0, 1.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Title,
    CompanyName,
    SectionHeader,
    Subsection,
    QuestionHeader,
    Body,
    Response,
    Analysis,
    Solution,
    CallToAction,
}

/// A piece of text with one weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub text: String,
    pub bold: bool,
}

impl Run {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bold: false,
        }
    }

    pub fn bold(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bold: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Full-width colored bar with text pinned left and right, one pair per row.
    Band {
        rows: Vec<(String, String)>,
        size: f32,
        fill: Color,
    },
    Paragraph {
        style: Style,
        runs: Vec<Run>,
    },
    Bullet(Vec<Run>),
    /// Two-column table with a spanning header row.
    Table {
        header: String,
        header_fill: Color,
        rows: Vec<(String, String)>,
    },
    Rule {
        color: Color,
        thickness: f32,
    },
    Spacer(f32),
    PageBreak,
    /// Moved to a fresh page as a unit when it does not fit in the space left.
    KeepTogether(Vec<Block>),
}

fn para(style: Style, text: impl Into<String>) -> Block {
    Block::Paragraph {
        style,
        runs: vec![Run::plain(text)],
    }
}

fn labelled(style: Style, label: &str, text: &str) -> Block {
    Block::Paragraph {
        style,
        runs: vec![Run::bold(label), Run::plain(text)],
    }
}

fn accent() -> Block {
    Block::Rule {
        color: AMBER,
        thickness: 3.0,
    }
}

fn separator() -> Block {
    Block::Rule {
        color: RULE_GRAY,
        thickness: 0.5,
    }
}

fn section_header(title: &str) -> Vec<Block> {
    vec![para(Style::SectionHeader, title), accent(), Block::Spacer(14.0)]
}

// ============ Sections ============

/// The whole report, in reading order.
pub fn compose(draft: &ReportDraft, branding: &BrandingConfig) -> Vec<Block> {
    let mut story = Vec::new();
    story.extend(cover(draft, branding));
    story.extend(executive_summary(draft));
    story.extend(methodology());
    story.extend(findings(&draft.insights));
    story.extend(recommendations(&draft.synthesis));
    story.extend(next_steps(draft, branding));
    story
}

fn cover(draft: &ReportDraft, branding: &BrandingConfig) -> Vec<Block> {
    let mut rows = vec![
        ("Client Organization".to_string(), draft.company_name.clone()),
        (
            "Assessment Date".to_string(),
            draft.generated_at.format("%B %d, %Y").to_string(),
        ),
        ("Stakeholder Role".to_string(), draft.persona.clone()),
        ("Assessment Framework".to_string(), branding.framework.clone()),
        (
            "Prepared By".to_string(),
            format!("{} AI Readiness Intelligence Engine", branding.provider_name),
        ),
    ];
    if let Some(site) = draft.company_website.as_deref().filter(|s| !s.is_empty()) {
        rows.insert(1, ("Company Website".to_string(), site.to_string()));
    }

    vec![
        Block::Band {
            rows: vec![(branding.provider_name.clone(), branding.tagline.clone())],
            size: 14.0,
            fill: NAVY,
        },
        accent(),
        Block::Spacer(60.0),
        para(Style::Title, REPORT_TITLE),
        Block::Spacer(30.0),
        para(Style::CompanyName, draft.company_name.to_uppercase()),
        Block::Spacer(30.0),
        Block::Table {
            header: "REPORT DETAILS".to_string(),
            header_fill: NAVY,
            rows,
        },
        Block::PageBreak,
    ]
}

fn executive_summary(draft: &ReportDraft) -> Vec<Block> {
    let mut blocks = section_header("EXECUTIVE SUMMARY");
    blocks.push(para(
        Style::Body,
        format!(
            "This assessment evaluates how ready {} is to adopt artificial intelligence \
             and where the strongest opportunities lie. It applies the four-dimension \
             CARE framework (Culture, Adoption, Readiness and Evolution) to the answers \
             provided by your {} and pairs each answer with a focused strategic analysis.",
            draft.company_name, draft.persona
        ),
    ));
    blocks.push(para(
        Style::Body,
        "The findings below highlight current strengths and gaps, and the closing \
         recommendations translate them into a practical roadmap aligned with your \
         business goals and operating capacity.",
    ));
    blocks.push(Block::Spacer(24.0));
    blocks
}

const DIMENSIONS: [(&str, &str); 4] = [
    (
        "Culture:",
        "Organizational mindset, change readiness, and cultural alignment with AI adoption",
    ),
    (
        "Adoption:",
        "Strategic vision, leadership commitment, and implementation approach",
    ),
    (
        "Readiness:",
        "Technical infrastructure, data maturity, and existing technology capabilities",
    ),
    (
        "Evolution:",
        "Long-term planning, scalability considerations, and continuous improvement frameworks",
    ),
];

fn methodology() -> Vec<Block> {
    let mut blocks = section_header("ASSESSMENT METHODOLOGY");
    blocks.push(para(
        Style::Body,
        "The CARE diagnostic framework evaluates AI readiness across four dimensions:",
    ));
    blocks.push(Block::Spacer(8.0));
    for (label, description) in DIMENSIONS {
        blocks.push(Block::Bullet(vec![Run::bold(label), Run::plain(description)]));
    }
    blocks.push(Block::PageBreak);
    blocks
}

/// Categories in report order: the four known dimensions first, then
/// unknown ones in order of first appearance.
pub fn category_order(insights: &[Insight]) -> Vec<Category> {
    let mut order: Vec<Category> = Category::ORDERED
        .iter()
        .copied()
        .filter(|c| insights.iter().any(|i| Category::from_char(i.category) == *c))
        .collect();
    for insight in insights {
        let category = Category::from_char(insight.category);
        if !order.contains(&category) {
            order.push(category);
        }
    }
    order
}

fn findings(insights: &[Insight]) -> Vec<Block> {
    let mut blocks = section_header("DETAILED ASSESSMENT FINDINGS");

    if insights.is_empty() {
        blocks.push(para(Style::Body, "No assessment responses were provided."));
    }

    for category in category_order(insights) {
        let items: Vec<&Insight> = insights
            .iter()
            .filter(|i| Category::from_char(i.category) == category)
            .collect();

        let header = vec![
            para(
                Style::Subsection,
                format!("{} ASSESSMENT", category.label().to_uppercase()),
            ),
            Block::Spacer(6.0),
        ];

        if items.len() <= 2 {
            let mut all = header;
            for (n, item) in items.iter().enumerate() {
                if n > 0 {
                    all.push(separator());
                    all.push(Block::Spacer(10.0));
                }
                all.push(finding_item(item));
            }
            blocks.push(Block::KeepTogether(all));
        } else {
            let mut first = header;
            first.push(finding_item(items[0]));
            blocks.push(Block::KeepTogether(first));
            for item in &items[1..] {
                blocks.push(separator());
                blocks.push(Block::Spacer(10.0));
                blocks.push(finding_item(item));
            }
        }
        blocks.push(Block::Spacer(18.0));
    }

    blocks.push(Block::PageBreak);
    blocks
}

/// Question, response and analysis, never split across pages.
fn finding_item(insight: &Insight) -> Block {
    Block::KeepTogether(vec![
        para(
            Style::QuestionHeader,
            format!(
                "Assessment Item {}: {}",
                insight.question_id, insight.question_text
            ),
        ),
        labelled(Style::Response, "Response:", &insight.answer_text),
        labelled(Style::Analysis, "Strategic Analysis:", &insight.insight_text),
    ])
}

fn recommendations(synthesis: &str) -> Vec<Block> {
    let mut blocks = section_header("STRATEGIC RECOMMENDATIONS");
    let paragraphs: Vec<&str> = synthesis
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        blocks.push(para(Style::Solution, "No recommendations were generated."));
    }
    for p in paragraphs {
        blocks.push(para(Style::Solution, p));
    }
    blocks.push(Block::Spacer(24.0));
    blocks
}

const NEXT_STEPS: [&str; 5] = [
    "Detailed implementation roadmap and timeline",
    "Resource allocation and investment planning",
    "Technology stack recommendations and vendor selection",
    "Change management and training programs",
    "Success metrics and performance monitoring frameworks",
];

fn next_steps(draft: &ReportDraft, branding: &BrandingConfig) -> Vec<Block> {
    let mut blocks = section_header("NEXT STEPS & ENGAGEMENT");
    blocks.push(para(
        Style::Body,
        "Based on this assessment, we recommend scheduling a strategic consultation to discuss:",
    ));
    blocks.push(Block::Spacer(6.0));
    for step in NEXT_STEPS {
        blocks.push(Block::Bullet(vec![Run::plain(step)]));
    }
    blocks.push(Block::Spacer(8.0));
    blocks.push(para(
        Style::Body,
        "Our team is ready to partner with you in turning these insights into results.",
    ));
    blocks.push(Block::Spacer(12.0));
    blocks.push(para(Style::CallToAction, "Ready to Transform Your AI Strategy?"));
    blocks.push(Block::Spacer(12.0));
    blocks.push(Block::KeepTogether(vec![Block::Table {
        header: format!("{} CONSULTING TEAM", branding.provider_name.to_uppercase()),
        header_fill: AMBER,
        rows: vec![
            ("Email".to_string(), branding.email.clone()),
            ("Phone".to_string(), branding.phone.clone()),
            (
                "Schedule Consultation".to_string(),
                branding.consultation_link.clone(),
            ),
            ("Website".to_string(), branding.website.clone()),
        ],
    }]));
    blocks.push(Block::Spacer(24.0));
    blocks.push(Block::Band {
        rows: vec![
            (
                format!(
                    "© {} {}. All rights reserved.",
                    draft.generated_at.format("%Y"),
                    branding.provider_name
                ),
                format!("Generated: {}", draft.generated_at.format("%B %d, %Y")),
            ),
            (
                format!("{} | {}", branding.email, branding.phone),
                branding.tagline.clone(),
            ),
        ],
        size: 8.0,
        fill: NAVY,
    });
    blocks
}

/// Every string drawn for the story, in order. Used to compare stories
/// without going through layout.
pub fn story_text(blocks: &[Block]) -> Vec<String> {
    let mut out = Vec::new();
    for block in blocks {
        match block {
            Block::Band { rows, .. } => {
                for (left, right) in rows {
                    out.push(left.clone());
                    out.push(right.clone());
                }
            }
            Block::Paragraph { runs, .. } | Block::Bullet(runs) => {
                out.push(
                    runs.iter()
                        .map(|r| r.text.as_str())
                        .collect::<Vec<_>>()
                        .join(" "),
                );
            }
            Block::Table { header, rows, .. } => {
                out.push(header.clone());
                for (label, value) in rows {
                    out.push(format!("{} {}", label, value));
                }
            }
            Block::KeepTogether(inner) => out.extend(story_text(inner)),
            Block::Rule { .. } | Block::Spacer(_) | Block::PageBreak => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn insight(id: &str, category: char) -> Insight {
        Insight {
            question_id: id.to_string(),
            category,
            question_text: format!("Question {}", id),
            answer_text: format!("Answer {}", id),
            insight_text: format!("Insight {}", id),
            failure: None,
        }
    }

    fn draft(insights: Vec<Insight>) -> ReportDraft {
        ReportDraft {
            company_name: "Acme".to_string(),
            company_website: None,
            persona: "CTO".to_string(),
            generated_at: chrono::Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
            insights,
            synthesis: "First paragraph.\n\nSecond paragraph.".to_string(),
        }
    }

    #[test]
    fn test_category_order() {
        let insights = vec![
            insight("E1", 'E'),
            insight("X1", 'X'),
            insight("C1", 'C'),
            insight("A1", 'A'),
            insight("Z1", 'Z'),
        ];
        let order: String = category_order(&insights).iter().map(|c| c.as_char()).collect();
        assert_eq!(order, "CAEXZ");
    }

    #[test]
    fn test_section_order() {
        let story = compose(&draft(vec![insight("C1", 'C')]), &BrandingConfig::default());
        let text = story_text(&story);
        let position = |needle: &str| {
            text.iter()
                .position(|t| t == needle)
                .unwrap_or_else(|| panic!("missing {}", needle))
        };
        let order = [
            REPORT_TITLE,
            "EXECUTIVE SUMMARY",
            "ASSESSMENT METHODOLOGY",
            "DETAILED ASSESSMENT FINDINGS",
            "CULTURE ASSESSMENT",
            "STRATEGIC RECOMMENDATIONS",
            "NEXT STEPS & ENGAGEMENT",
        ];
        for pair in order.windows(2) {
            assert!(position(pair[0]) < position(pair[1]), "{:?}", pair);
        }
        assert!(text.contains(&"Response: Answer C1".to_string()));
        assert!(text.contains(&"Strategic Analysis: Insight C1".to_string()));
        assert!(text.contains(&"Second paragraph.".to_string()));
        assert!(text.contains(&"Assessment Date March 04, 2026".to_string()));
    }

    #[test]
    fn test_small_category_kept_together() {
        let story = findings(&[insight("C1", 'C'), insight("C2", 'C')]);
        let groups = story
            .iter()
            .filter(|b| matches!(b, Block::KeepTogether(_)))
            .count();
        assert_eq!(groups, 1);
    }

    #[test]
    fn test_large_category_header_with_first_item() {
        let items: Vec<Insight> = (1..=4).map(|i| insight(&format!("A{}", i), 'A')).collect();
        let story = findings(&items);
        let first_group = story
            .iter()
            .find_map(|b| match b {
                Block::KeepTogether(inner) => Some(story_text(inner)),
                _ => None,
            })
            .unwrap();
        assert_eq!(first_group[0], "ADOPTION ASSESSMENT");
        assert_eq!(first_group[1], "Assessment Item A1: Question A1");
        assert_eq!(first_group.len(), 4);

        // Remaining items are each their own unbreakable block.
        let items_after = story
            .iter()
            .filter(|b| matches!(b, Block::KeepTogether(_)))
            .count();
        assert_eq!(items_after, 4);
    }
}
