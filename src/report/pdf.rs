//! PDF encoding of laid-out pages with `lopdf`.
//!
//! Uses the two standard Helvetica faces with WinAnsi encoding, so no font
//! program is embedded. Streams are left uncompressed and the document
//! carries no random identifiers, which keeps output byte-identical for
//! identical input.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};

use super::layout::{Mark, Page, PAGE_HEIGHT, PAGE_WIDTH};
use super::sections::Color;

pub struct PdfInfo<'a> {
    pub title: &'a str,
    pub author: &'a str,
    pub created: DateTime<Utc>,
}

pub fn encode(pages: &[Page], info: &PdfInfo<'_>) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        let content = Content {
            operations: page_operations(page),
        };
        let bytes = content.encode().context("Failed to encode page content")?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, bytes));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );

    let catalog = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::String(to_win_ansi(info.title), StringFormat::Literal),
        "Author" => Object::String(to_win_ansi(info.author), StringFormat::Literal),
        "Producer" => Object::string_literal("readiness-report"),
        "CreationDate" => Object::string_literal(info.created.format("D:%Y%m%d%H%M%SZ").to_string()),
    });
    doc.trailer.set("Root", catalog);
    doc.trailer.set("Info", info_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).context("Failed to serialize PDF")?;
    Ok(out)
}

fn color_operands(c: Color) -> Vec<Object> {
    vec![c.0.into(), c.1.into(), c.2.into()]
}

fn page_operations(page: &Page) -> Vec<Operation> {
    let mut ops = Vec::new();
    for mark in &page.marks {
        match mark {
            Mark::Rect {
                x,
                y,
                width,
                height,
                fill,
            } => {
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new("rg", color_operands(*fill)));
                ops.push(Operation::new(
                    "re",
                    vec![
                        (*x).into(),
                        (PAGE_HEIGHT - y - height).into(),
                        (*width).into(),
                        (*height).into(),
                    ],
                ));
                ops.push(Operation::new("f", vec![]));
                ops.push(Operation::new("Q", vec![]));
            }
            Mark::Line {
                x1,
                y1,
                x2,
                y2,
                width,
                color,
            } => {
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new("RG", color_operands(*color)));
                ops.push(Operation::new("w", vec![(*width).into()]));
                ops.push(Operation::new("m", vec![(*x1).into(), (PAGE_HEIGHT - y1).into()]));
                ops.push(Operation::new("l", vec![(*x2).into(), (PAGE_HEIGHT - y2).into()]));
                ops.push(Operation::new("S", vec![]));
                ops.push(Operation::new("Q", vec![]));
            }
            Mark::Text {
                x,
                y,
                size,
                bold,
                color,
                text,
            } => {
                let font = if *bold { "F2" } else { "F1" };
                ops.push(Operation::new("rg", color_operands(*color)));
                ops.push(Operation::new("BT", vec![]));
                ops.push(Operation::new(
                    "Tf",
                    vec![Object::Name(font.as_bytes().to_vec()), (*size).into()],
                ));
                ops.push(Operation::new("Td", vec![(*x).into(), (PAGE_HEIGHT - y).into()]));
                ops.push(Operation::new(
                    "Tj",
                    vec![Object::String(to_win_ansi(text), StringFormat::Literal)],
                ));
                ops.push(Operation::new("ET", vec![]));
            }
        }
    }
    ops
}

// ============ WinAnsi ============

const WIN_ANSI_EXTRAS: [(char, u8); 12] = [
    ('\u{20AC}', 0x80),
    ('\u{2026}', 0x85),
    ('\u{2018}', 0x91),
    ('\u{2019}', 0x92),
    ('\u{201C}', 0x93),
    ('\u{201D}', 0x94),
    ('\u{2022}', 0x95),
    ('\u{2013}', 0x96),
    ('\u{2014}', 0x97),
    ('\u{2122}', 0x99),
    ('\u{0152}', 0x8C),
    ('\u{0153}', 0x9C),
];

/// Encodes text for the standard fonts. Characters outside WinAnsi become `?`.
pub fn to_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u8,
            _ => WIN_ANSI_EXTRAS
                .iter()
                .find(|(ch, _)| *ch == c)
                .map(|(_, b)| *b)
                .unwrap_or(b'?'),
        })
        .collect()
}

pub fn from_win_ansi(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            WIN_ANSI_EXTRAS
                .iter()
                .find(|(_, code)| *code == b)
                .map(|(ch, _)| *ch)
                .unwrap_or(b as char)
        })
        .collect()
}

/// Text drawn on each page, in drawing order, joined with single spaces.
pub fn page_text(pdf: &[u8]) -> Result<Vec<String>> {
    let doc = Document::load_mem(pdf).context("Failed to parse PDF")?;
    let mut out = Vec::new();
    for (_, page_id) in doc.get_pages() {
        let data = doc
            .get_page_content(page_id)
            .context("Failed to read page content")?;
        let content = Content::decode(&data).context("Failed to decode page content")?;
        let strings: Vec<String> = content
            .operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| match op.operands.first() {
                Some(Object::String(bytes, _)) => Some(from_win_ansi(bytes)),
                _ => None,
            })
            .collect();
        out.push(strings.join(" "));
    }
    Ok(out)
}
