//! Deterministic pagination of the report story.
//!
//! Blocks are flattened into rows of known height, then placed top-down on
//! A4 pages. Coordinates in [`Mark`] are measured from the top-left corner
//! of the page; the encoder flips them into PDF space.
//!
//! Text is measured with the standard Helvetica metrics so wrapping matches
//! what a viewer renders with the built-in fonts.
//!
//! | Rule | Behavior |
//! |------|----------|
//! | Paragraph | wrapped greedily; may split between lines |
//! | KeepTogether | moved to a new page when it would straddle one |
//! | PageBreak | starts a new page unless the current one is empty |
//! | Spacer | dropped at the top of a page; forces a new page at the bottom |

use super::sections::{Block, Color, Run, Style, AMBER, LIGHT_GRAY, NAVY, RULE_GRAY, TEAL, TEXT, WHITE};

pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;
pub const MARGIN: f32 = 40.0;
const FOOTER_SPACE: f32 = 20.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const CONTENT_BOTTOM: f32 = PAGE_HEIGHT - MARGIN - FOOTER_SPACE;
const USABLE_HEIGHT: f32 = CONTENT_BOTTOM - MARGIN;
const CELL_PADDING: f32 = 6.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Mark {
    /// `y` is the baseline.
    Text {
        x: f32,
        y: f32,
        size: f32,
        bold: bool,
        color: Color,
        text: String,
    },
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        fill: Color,
    },
    Line {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        width: f32,
        color: Color,
    },
}

impl Mark {
    fn shifted(mut self, dy: f32) -> Self {
        match &mut self {
            Mark::Text { y, .. } | Mark::Rect { y, .. } => *y += dy,
            Mark::Line { y1, y2, .. } => {
                *y1 += dy;
                *y2 += dy;
            }
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub marks: Vec<Mark>,
}

// ============ Font metrics ============

/// Helvetica advance widths for ASCII 32..=126, in 1/1000 em.
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556,
    333, 333, 584, 584, 584, 611, 975,
    722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833,
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611,
    333, 278, 333, 584, 556, 333,
    556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889,
    611, 611, 611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500,
    389, 280, 389, 584,
];

fn char_width(c: char, bold: bool) -> u16 {
    let table = if bold { &HELVETICA_BOLD } else { &HELVETICA };
    match c as u32 {
        code @ 32..=126 => table[(code - 32) as usize],
        _ => 556,
    }
}

/// Rendered width of `text` in points.
pub fn text_width(text: &str, size: f32, bold: bool) -> f32 {
    let units: u32 = text.chars().map(|c| char_width(c, bold) as u32).sum();
    units as f32 * size / 1000.0
}

// ============ Styles ============

struct StyleSpec {
    size: f32,
    bold: bool,
    color: Color,
    indent: f32,
    centered: bool,
    before: f32,
    after: f32,
}

fn spec(style: Style) -> StyleSpec {
    let base = StyleSpec {
        size: 10.5,
        bold: false,
        color: TEXT,
        indent: 0.0,
        centered: false,
        before: 0.0,
        after: 6.0,
    };
    match style {
        Style::Title => StyleSpec {
            size: 24.0,
            bold: true,
            color: NAVY,
            centered: true,
            after: 10.0,
            ..base
        },
        Style::CompanyName => StyleSpec {
            size: 18.0,
            bold: true,
            color: TEAL,
            centered: true,
            ..base
        },
        Style::SectionHeader => StyleSpec {
            size: 16.0,
            bold: true,
            color: NAVY,
            before: 4.0,
            after: 4.0,
            ..base
        },
        Style::Subsection => StyleSpec {
            size: 13.0,
            bold: true,
            color: TEAL,
            before: 6.0,
            ..base
        },
        Style::QuestionHeader => StyleSpec {
            size: 11.0,
            bold: true,
            color: NAVY,
            before: 4.0,
            after: 4.0,
            ..base
        },
        Style::Body | Style::Solution => base,
        Style::Response | Style::Analysis => StyleSpec {
            size: 10.0,
            indent: 12.0,
            ..base
        },
        Style::CallToAction => StyleSpec {
            size: 14.0,
            bold: true,
            color: AMBER,
            centered: true,
            ..base
        },
    }
}

fn leading(size: f32) -> f32 {
    size * 1.35
}

// ============ Wrapping ============

/// A wrapped line: segments of uniform weight, each carrying its own
/// trailing space when followed by another segment.
#[derive(Debug, Default)]
struct Line {
    segments: Vec<(String, bool)>,
    width: f32,
}

impl Line {
    fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn push_word(&mut self, word: &str, bold: bool, size: f32) {
        if let Some((last, last_bold)) = self.segments.last_mut() {
            last.push(' ');
            self.width += text_width(" ", size, *last_bold);
            if *last_bold == bold {
                last.push_str(word);
                self.width += text_width(word, size, bold);
                return;
            }
        }
        self.segments.push((word.to_string(), bold));
        self.width += text_width(word, size, bold);
    }
}

fn wrap(runs: &[Run], size: f32, max_width: f32) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut line = Line::default();

    for run in runs {
        for word in run.text.split_whitespace() {
            for piece in break_word(word, size, run.bold, max_width) {
                let extra = if line.is_empty() { 0.0 } else { text_width(" ", size, run.bold) };
                if !line.is_empty() && line.width + extra + text_width(&piece, size, run.bold) > max_width {
                    lines.push(std::mem::take(&mut line));
                }
                line.push_word(&piece, run.bold, size);
            }
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Splits a word wider than the line into line-sized pieces.
fn break_word(word: &str, size: f32, bold: bool, max_width: f32) -> Vec<String> {
    if text_width(word, size, bold) <= max_width {
        return vec![word.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for c in word.chars() {
        let mut candidate = current.clone();
        candidate.push(c);
        if !current.is_empty() && text_width(&candidate, size, bold) > max_width {
            pieces.push(std::mem::take(&mut current));
            current.push(c);
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn line_marks(line: &Line, x: f32, baseline: f32, size: f32, color: Color) -> Vec<Mark> {
    let mut marks = Vec::new();
    let mut cursor = x;
    for (text, bold) in &line.segments {
        marks.push(Mark::Text {
            x: cursor,
            y: baseline,
            size,
            bold: *bold,
            color,
            text: text.clone(),
        });
        cursor += text_width(text, size, *bold);
    }
    marks
}

// ============ Flattening ============

/// A horizontal strip of marks, positioned relative to its own top edge.
#[derive(Debug, Clone)]
struct Row {
    height: f32,
    marks: Vec<Mark>,
}

enum Item {
    Row(Row),
    /// Kept on one page when it fits on any page. Nested groups stay whole
    /// even when the outer group has to be split.
    Group(Vec<Item>),
    Spacer(f32),
    Break,
}

impl Item {
    fn height(&self) -> f32 {
        match self {
            Item::Row(row) => row.height,
            Item::Group(items) => items.iter().map(Item::height).sum(),
            Item::Spacer(h) => *h,
            Item::Break => 0.0,
        }
    }
}

fn paragraph_rows(style: Style, runs: &[Run], extra_indent: f32) -> Vec<Row> {
    let spec = spec(style);
    let left = MARGIN + spec.indent + extra_indent;
    let width = CONTENT_WIDTH - spec.indent - extra_indent;
    let lead = leading(spec.size);
    let lines = if spec.bold {
        let bold: Vec<Run> = runs.iter().map(|r| Run::bold(r.text.as_str())).collect();
        wrap(&bold, spec.size, width)
    } else {
        wrap(runs, spec.size, width)
    };
    let count = lines.len();

    lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| {
            let before = if i == 0 { spec.before } else { 0.0 };
            let after = if i + 1 == count { spec.after } else { 0.0 };
            let x = if spec.centered {
                MARGIN + (CONTENT_WIDTH - line.width) / 2.0
            } else {
                left
            };
            Row {
                height: before + lead + after,
                marks: line_marks(&line, x, before + spec.size, spec.size, spec.color),
            }
        })
        .collect()
}

fn bullet_rows(runs: &[Run]) -> Vec<Row> {
    const BULLET_INDENT: f32 = 18.0;
    let mut rows = paragraph_rows(Style::Body, runs, BULLET_INDENT);
    if let Some(first) = rows.first_mut() {
        let size = spec(Style::Body).size;
        first.marks.insert(
            0,
            Mark::Text {
                x: MARGIN + 6.0,
                y: size,
                size,
                bold: false,
                color: TEXT,
                text: "\u{2022}".to_string(),
            },
        );
    }
    rows
}

fn band_row(rows: &[(String, String)], size: f32, fill: Color) -> Row {
    let lead = leading(size);
    let height = rows.len() as f32 * lead + 2.0 * CELL_PADDING;
    let mut marks = vec![Mark::Rect {
        x: MARGIN,
        y: 0.0,
        width: CONTENT_WIDTH,
        height,
        fill,
    }];
    for (i, (left, right)) in rows.iter().enumerate() {
        let baseline = CELL_PADDING + i as f32 * lead + size;
        marks.push(Mark::Text {
            x: MARGIN + CELL_PADDING,
            y: baseline,
            size,
            bold: true,
            color: WHITE,
            text: left.clone(),
        });
        let right_size = size * 0.8;
        marks.push(Mark::Text {
            x: MARGIN + CONTENT_WIDTH - CELL_PADDING - text_width(right, right_size, false),
            y: baseline,
            size: right_size,
            bold: false,
            color: WHITE,
            text: right.clone(),
        });
    }
    Row { height, marks }
}

fn table_rows(header: &str, header_fill: Color, rows: &[(String, String)]) -> Vec<Row> {
    const SIZE: f32 = 10.0;
    let label_width = CONTENT_WIDTH * 0.35;
    let value_width = CONTENT_WIDTH - label_width;
    let lead = leading(SIZE);

    let header_size = 11.0;
    let header_height = leading(header_size) + 2.0 * CELL_PADDING;
    let mut out = vec![Row {
        height: header_height,
        marks: vec![
            Mark::Rect {
                x: MARGIN,
                y: 0.0,
                width: CONTENT_WIDTH,
                height: header_height,
                fill: header_fill,
            },
            Mark::Text {
                x: MARGIN + CELL_PADDING,
                y: CELL_PADDING + header_size,
                size: header_size,
                bold: true,
                color: WHITE,
                text: header.to_string(),
            },
        ],
    }];

    for (label, value) in rows {
        let label_lines = wrap(&[Run::bold(label.as_str())], SIZE, label_width - 2.0 * CELL_PADDING);
        let value_lines = wrap(&[Run::plain(value.as_str())], SIZE, value_width - 2.0 * CELL_PADDING);
        let lines = label_lines.len().max(value_lines.len()).max(1);
        let height = lines as f32 * lead + 2.0 * CELL_PADDING;

        let mut marks = vec![Mark::Rect {
            x: MARGIN,
            y: 0.0,
            width: label_width,
            height,
            fill: LIGHT_GRAY,
        }];
        for (i, line) in label_lines.iter().enumerate() {
            let baseline = CELL_PADDING + i as f32 * lead + SIZE;
            marks.extend(line_marks(line, MARGIN + CELL_PADDING, baseline, SIZE, NAVY));
        }
        for (i, line) in value_lines.iter().enumerate() {
            let baseline = CELL_PADDING + i as f32 * lead + SIZE;
            marks.extend(line_marks(
                line,
                MARGIN + label_width + CELL_PADDING,
                baseline,
                SIZE,
                TEXT,
            ));
        }
        marks.push(Mark::Line {
            x1: MARGIN,
            y1: height,
            x2: MARGIN + CONTENT_WIDTH,
            y2: height,
            width: 0.5,
            color: RULE_GRAY,
        });
        out.push(Row { height, marks });
    }
    out
}

fn rule_row(color: Color, thickness: f32) -> Row {
    let y = 4.0 + thickness / 2.0;
    Row {
        height: thickness + 8.0,
        marks: vec![Mark::Line {
            x1: MARGIN,
            y1: y,
            x2: MARGIN + CONTENT_WIDTH,
            y2: y,
            width: thickness,
            color,
        }],
    }
}

fn block_rows(block: &Block) -> Vec<Row> {
    match block {
        Block::Band { rows, size, fill } => vec![band_row(rows, *size, *fill)],
        Block::Paragraph { style, runs } => paragraph_rows(*style, runs, 0.0),
        Block::Bullet(runs) => bullet_rows(runs),
        Block::Table {
            header,
            header_fill,
            rows,
        } => table_rows(header, *header_fill, rows),
        Block::Rule { color, thickness } => vec![rule_row(*color, *thickness)],
        Block::Spacer(h) => vec![Row {
            height: *h,
            marks: Vec::new(),
        }],
        Block::PageBreak => Vec::new(),
        Block::KeepTogether(inner) => inner.iter().flat_map(block_rows).collect(),
    }
}

fn flatten(blocks: &[Block]) -> Vec<Item> {
    let mut items = Vec::new();
    for block in blocks {
        match block {
            Block::PageBreak => items.push(Item::Break),
            Block::Spacer(h) => items.push(Item::Spacer(*h)),
            Block::KeepTogether(inner) => items.push(Item::Group(grouped(inner))),
            other => items.extend(block_rows(other).into_iter().map(Item::Row)),
        }
    }
    items
}

/// Contents of a keep-together block. Spacers become blank rows.
fn grouped(blocks: &[Block]) -> Vec<Item> {
    blocks
        .iter()
        .flat_map(|block| match block {
            Block::KeepTogether(inner) => vec![Item::Group(grouped(inner))],
            other => block_rows(other).into_iter().map(Item::Row).collect(),
        })
        .collect()
}

// ============ Placement ============

struct Paginator {
    pages: Vec<Page>,
    current: Page,
    cursor: f32,
}

impl Paginator {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Page::default(),
            cursor: MARGIN,
        }
    }

    fn is_page_empty(&self) -> bool {
        self.current.marks.is_empty()
    }

    fn new_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.current));
        self.cursor = MARGIN;
    }

    fn remaining(&self) -> f32 {
        CONTENT_BOTTOM - self.cursor
    }

    fn place_row(&mut self, row: Row) {
        if row.height > self.remaining() && !self.is_page_empty() {
            self.new_page();
        }
        let top = self.cursor;
        self.current
            .marks
            .extend(row.marks.into_iter().map(|m| m.shifted(top)));
        self.cursor += row.height;
    }

    fn place(&mut self, item: Item) {
        match item {
            Item::Row(row) => self.place_row(row),
            Item::Group(items) => {
                let total: f32 = items.iter().map(Item::height).sum();
                if total > self.remaining() && !self.is_page_empty() && total <= USABLE_HEIGHT {
                    self.new_page();
                }
                for item in items {
                    self.place(item);
                }
            }
            Item::Spacer(h) => {
                if self.is_page_empty() {
                    return;
                }
                if h > self.remaining() {
                    self.new_page();
                } else {
                    self.cursor += h;
                }
            }
            Item::Break => {
                if !self.is_page_empty() {
                    self.new_page();
                }
            }
        }
    }

    fn finish(mut self) -> Vec<Page> {
        if !self.is_page_empty() || self.pages.is_empty() {
            self.new_page();
        }
        let total = self.pages.len();
        for (i, page) in self.pages.iter_mut().enumerate() {
            let label = format!("Page {} of {}", i + 1, total);
            let size = 8.0;
            page.marks.push(Mark::Text {
                x: (PAGE_WIDTH - text_width(&label, size, false)) / 2.0,
                y: PAGE_HEIGHT - MARGIN / 2.0,
                size,
                bold: false,
                color: TEXT,
                text: label,
            });
        }
        self.pages
    }
}

/// Lays the story out on pages. Always returns at least one page.
pub fn paginate(blocks: &[Block]) -> Vec<Page> {
    let mut paginator = Paginator::new();
    for item in flatten(blocks) {
        paginator.place(item);
    }
    paginator.finish()
}
