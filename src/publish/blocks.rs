//! Lightweight markup to document blocks
//!
//! Only keeps the visual structure: headings become heading blocks, list items,
//! quotes, table rows and fenced code become plain text blocks, and inline
//! emphasis is dropped.

use serde_json::{json, Value};

/// Most children the document API accepts in one call
pub const MAX_CHILDREN_PER_CALL: usize = 50;

/// Document block types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Heading1,
    Heading2,
}

impl BlockKind {
    /// Numeric block type used by the docx API
    pub fn block_type(&self) -> u8 {
        match self {
            BlockKind::Text => 2,
            BlockKind::Heading1 => 3,
            BlockKind::Heading2 => 4,
        }
    }

    fn field(&self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Heading1 => "heading1",
            BlockKind::Heading2 => "heading2",
        }
    }
}

/// One block with a single text run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub content: String,
    pub bold: bool,
}

impl Block {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Text,
            content: content.into(),
            bold: false,
        }
    }

    pub fn heading1(content: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Heading1,
            content: content.into(),
            bold: true,
        }
    }

    pub fn heading2(content: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Heading2,
            content: content.into(),
            bold: true,
        }
    }

    /// Request body form of the block
    pub fn to_json(&self) -> Value {
        let mut block = json!({ "block_type": self.kind.block_type() });
        block[self.kind.field()] = json!({
            "style": {},
            "elements": [{
                "text_run": {
                    "content": self.content,
                    "text_element_style": { "bold": self.bold }
                }
            }]
        });
        block
    }
}

// ─────────────────────────────────────────────────────────────────
// Entry points
// ─────────────────────────────────────────────────────────────────

/// Blocks for a whole body: translated when it carries markup, else one text block
pub fn body_blocks(text: &str) -> Vec<Block> {
    let text = text.trim();
    if text.is_empty() {
        Vec::new()
    } else if looks_like_markup(text) {
        markup_to_blocks(text)
    } else {
        vec![Block::text(text)]
    }
}

/// Blocks for a persona rewrite, translated paragraph by paragraph
pub fn paragraph_blocks(text: &str) -> Vec<Block> {
    paragraphs(text).iter().flat_map(|p| body_blocks(p)).collect()
}

/// Split on blank lines that sit outside fenced code
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_code = false;

    for line in text.trim().lines() {
        if line.trim().starts_with("```") {
            in_code = !in_code;
        }
        if !in_code && line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

/// Rough check for lightweight markup
pub fn looks_like_markup(text: &str) -> bool {
    text.lines().map(str::trim).filter(|s| !s.is_empty()).any(|s| {
        s.starts_with('#')
            || s.starts_with('-')
            || s.starts_with('*')
            || s.starts_with("+ ")
            || s.starts_with('>')
            || s.starts_with("```")
            || ordered_item(s).is_some()
            || s.contains("**")
            || s.contains("__")
            || (s.contains('[') && s.contains("]("))
    })
}

// ─────────────────────────────────────────────────────────────────
// Conversion
// ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Converter {
    blocks: Vec<Block>,
    paragraph: Vec<String>,
    code: Vec<String>,
    in_code: bool,
    table: Vec<String>,
    in_table: bool,
}

impl Converter {
    fn flush_paragraph(&mut self) {
        let paragraph = self.paragraph.join("\n");
        self.paragraph.clear();
        let paragraph = paragraph.trim();
        if !paragraph.is_empty() {
            self.blocks.push(Block::text(strip_inline_markup(paragraph)));
        }
    }

    fn flush_code(&mut self) {
        if !self.code.is_empty() {
            self.blocks
                .push(Block::text(format!("```\n{}\n```", self.code.join("\n"))));
            self.code.clear();
        }
    }

    fn flush_table(&mut self) {
        for row in self.table.drain(..) {
            let cells: Vec<String> = row
                .trim()
                .trim_matches('|')
                .split('|')
                .map(|cell| strip_inline_markup(cell.trim()))
                .collect();
            self.blocks.push(Block::text(cells.join(" | ")));
        }
        self.in_table = false;
    }

    /// Close whatever open paragraph or table precedes a structural line
    fn break_flow(&mut self) {
        self.flush_paragraph();
        if self.in_table {
            self.flush_table();
        }
    }

    fn line(&mut self, raw: &str) {
        let s = raw.trim();

        if s.starts_with("```") {
            self.break_flow();
            if self.in_code {
                self.in_code = false;
                self.flush_code();
            } else {
                self.in_code = true;
            }
            return;
        }
        if self.in_code {
            self.code.push(raw.to_string());
            return;
        }

        if s.is_empty() {
            self.break_flow();
            return;
        }

        if s.starts_with('#') {
            self.break_flow();
            let content = s.trim_start_matches(['#', ' ']).trim();
            self.blocks.push(Block::heading2(strip_inline_markup(content)));
            return;
        }

        if s.starts_with('>') {
            let content = s.trim_start_matches(['>', ' ']).trim();
            self.paragraph
                .push(format!("【引用】{}", strip_inline_markup(content)));
            return;
        }

        if let Some(item) = ["- ", "* ", "+ "].iter().find_map(|m| s.strip_prefix(m)) {
            self.break_flow();
            self.blocks
                .push(Block::text(format!("• {}", strip_inline_markup(item.trim()))));
            return;
        }

        if let Some((num, item)) = ordered_item(s) {
            self.break_flow();
            self.blocks.push(Block::text(format!(
                "{}. {}",
                num,
                strip_inline_markup(item.trim())
            )));
            return;
        }

        if !self.in_table && s.contains('|') && is_table_separator(s) {
            if let Some(header) = self.paragraph.last().filter(|h| h.contains('|')).cloned() {
                self.paragraph.pop();
                self.flush_paragraph();
                self.in_table = true;
                self.table.push(header);
                return;
            }
        }

        if self.in_table {
            if s.contains('|') {
                self.table.push(s.to_string());
                return;
            }
            self.flush_table();
        }

        self.paragraph.push(s.to_string());
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush_paragraph();
        self.flush_code();
        if self.in_table {
            self.flush_table();
        }
        self.blocks
    }
}

/// Translate markup into blocks
pub fn markup_to_blocks(markup: &str) -> Vec<Block> {
    let mut converter = Converter::default();
    for line in markup.trim().lines() {
        converter.line(line);
    }
    converter.finish()
}

/// `12. item` -> `("12", " item")`; `1.5亿` is not an item
fn ordered_item(s: &str) -> Option<(&str, &str)> {
    let (num, rest) = s.split_once('.')?;
    let numeric = !num.is_empty() && num.chars().all(|c| c.is_ascii_digit());
    (numeric && rest.starts_with(' ') && !rest.trim().is_empty()).then_some((num, rest))
}

/// `| --- | :---: |`
fn is_table_separator(s: &str) -> bool {
    let segments: Vec<&str> = s.split('|').map(str::trim).filter(|c| !c.is_empty()).collect();
    !segments.is_empty()
        && segments
            .iter()
            .all(|seg| seg.chars().all(|c| c == '-' || c == ':'))
}

// ─────────────────────────────────────────────────────────────────
// Inline markup
// ─────────────────────────────────────────────────────────────────

/// Drop inline emphasis, code spans and link syntax, keeping the text
pub fn strip_inline_markup(text: &str) -> String {
    let text = replace_links(text, "![", |alt, url| format!("{} ({})", alt, url));
    let mut text = replace_links(&text, "[", |label, _| label.to_string());
    for marker in ["**", "__", "~~", "*", "_", "`"] {
        text = strip_pairs(&text, marker);
    }
    text
}

/// Rewrite `<prefix>label](url)` spans on a single line
fn replace_links(text: &str, prefix: &str, render: impl Fn(&str, &str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find(prefix) {
        let body = &rest[open + prefix.len()..];
        let span = body.find("](").and_then(|mid| {
            let target = &body[mid + 2..];
            target
                .find(')')
                .map(|end| (&body[..mid], &target[..end], mid + 2 + end + 1))
        });

        match span {
            Some((label, url, used)) if !label.contains('\n') && !url.contains('\n') => {
                out.push_str(&rest[..open]);
                out.push_str(&render(label, url));
                rest = &body[used..];
            }
            _ => {
                out.push_str(&rest[..open + prefix.len()]);
                rest = body;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Remove matched pairs of `marker` on the same line
fn strip_pairs(text: &str, marker: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find(marker) {
        let after = &rest[open + marker.len()..];
        match after.find(marker) {
            Some(close) if !after[..close].contains('\n') => {
                out.push_str(&rest[..open]);
                out.push_str(&after[..close]);
                rest = &after[close + marker.len()..];
            }
            _ => {
                out.push_str(&rest[..open + marker.len()]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
