use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());
static LIST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:[-*+•]|\d{1,3}[.)])\s+").unwrap());
static SINGLE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[([^\]]*)\]\(([^)\s]+)(?:\s+[^)]*)?\)$").unwrap());
static INLINE_LINKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)(?:\s+[^)]*)?\)").unwrap());
static CLOSE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\]\(([^)]+)\)(.*)$").unwrap());
static TABLE_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\|?[\s:|-]+\|?$").unwrap());
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^(?:posted\s*(?:on)?\s*:?\s*)?(?:
            today | yesterday | just\ posted |
            \d{1,3}\+?\s*(?:minute|hour|day|week|month)s?\s+ago |
            (?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4} |
            \d{1,2}\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{4} |
            \d{4}-\d{2}-\d{2}(?:[t\s][\d:.+z-]*)? |
            \d{1,2}/\d{1,2}/\d{2,4}
        )$",
    )
    .unwrap()
});

static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Link { text: String, url: String },
    /// Cells of one table row, raw markdown per cell.
    TableRow(Vec<String>),
    Text(String),
    Empty,
}

pub fn classify_lines(markdown: &str) -> Vec<Block> {
    if markdown.trim().is_empty() {
        return vec![Block::Empty];
    }

    let lines: Vec<&str> = markdown.lines().collect();
    let mut blocks = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        let line = LIST_MARKER_RE.replace(lines[i].trim(), "");
        let line = line.trim();

        if line.is_empty() {
            blocks.push(Block::Empty);
            i += 1;
            continue;
        }

        // ── Multi-line link: "[" then text lines then "](url)" ──
        if line == "[" {
            i = consume_multiline_link(&lines, i, &mut blocks);
            continue;
        }

        // ── Stray ](url), possibly followed by another "[" ──
        if line.starts_with("](") {
            if let Some(caps) = CLOSE_LINK_RE.captures(line) {
                emit_link("", &caps[1], &mut blocks);
                if caps[2].trim() == "[" {
                    i = consume_multiline_link(&lines, i + 1, &mut blocks);
                    continue;
                }
            }
            i += 1;
            continue;
        }

        if let Some(caps) = HEADING_RE.captures(line) {
            blocks.push(Block::Heading {
                level: caps[1].len() as u8,
                text: caps[2].trim().to_string(),
            });
            i += 1;
            continue;
        }

        // ── Table row: | a | b | ──
        if line.starts_with('|') {
            if !TABLE_SEPARATOR_RE.is_match(line) {
                blocks.push(Block::TableRow(split_cells(line)));
            }
            i += 1;
            continue;
        }

        if let Some(caps) = SINGLE_LINK_RE.captures(line) {
            emit_link(&caps[1], &caps[2], &mut blocks);
            i += 1;
            continue;
        }

        // ── Line with inline links, keep the leftover text after them ──
        if line.contains("](") && line.contains('[') {
            for caps in INLINE_LINKS_RE.captures_iter(line) {
                emit_link(&caps[1], &caps[2], &mut blocks);
            }
            let rest = INLINE_LINKS_RE.replace_all(line, " ");
            let rest = rest.trim_matches(|c: char| c.is_whitespace() || "-–—|·•,[".contains(c));
            if !rest.is_empty() {
                blocks.push(Block::Text(SPACES_RE.replace_all(rest, " ").to_string()));
            }
            if line.ends_with('[') {
                i = consume_multiline_link(&lines, i + 1, &mut blocks);
                continue;
            }
            i += 1;
            continue;
        }

        blocks.push(Block::Text(line.to_string()));
        i += 1;
    }

    blocks
}

/// Reads text lines after a "[" until the closing "](url)".
/// Returns the next line index to process.
fn consume_multiline_link(lines: &[&str], start: usize, blocks: &mut Vec<Block>) -> usize {
    let mut text_parts = Vec::new();
    let mut j = start;

    if j < lines.len() && lines[j].trim() == "[" {
        j += 1;
    }

    while j < lines.len() {
        let l = lines[j].trim();
        if let Some(url_part) = l.strip_prefix("](") {
            let (url, has_trailing_open) = match url_part.find(')') {
                Some(end) => {
                    let rest = url_part[end + 1..].trim();
                    (&url_part[..end], rest.ends_with('['))
                }
                None => (url_part.trim_end_matches(')'), false),
            };

            emit_link(&text_parts.join(" "), url, blocks);

            if has_trailing_open {
                return consume_multiline_link(lines, j + 1, blocks);
            }
            return j + 1;
        }
        if !l.is_empty() {
            text_parts.push(l);
        }
        j += 1;
    }

    // Never closed: keep the text
    for part in text_parts {
        blocks.push(Block::Text(part.to_string()));
    }
    j
}

fn emit_link(text: &str, url: &str, blocks: &mut Vec<Block>) {
    let url = url.trim().trim_start_matches('<').trim_end_matches('>');
    blocks.push(Block::Link {
        text: SPACES_RE.replace_all(text.trim(), " ").to_string(),
        url: url.to_string(),
    });
}

fn split_cells(line: &str) -> Vec<String> {
    line.trim()
        .trim_start_matches('|')
        .trim_end_matches('|')
        .split('|')
        .map(|c| c.trim().to_string())
        .collect()
}

/// Finds `[text](url)` links inside one line of markdown.
pub fn inline_links(text: &str) -> Vec<(String, String)> {
    INLINE_LINKS_RE
        .captures_iter(text)
        .map(|c| (c[1].trim().to_string(), c[2].to_string()))
        .collect()
}

pub fn is_date_like(s: &str) -> bool {
    DATE_RE.is_match(s.trim())
}

const SKIPPED_ELEMENTS: &[&str] = &["head", "script", "style", "noscript", "template", "svg", "iframe"];
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "li", "ul", "ol", "section", "article", "header", "footer", "nav", "main", "aside",
    "table", "thead", "tbody", "tfoot", "dl", "dt", "dd", "form", "button", "label", "body",
];

/// Reduce an HTML page to the markdown-like line stream `classify_lines` reads.
pub fn html_to_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut writer = LineWriter::default();
    writer.walk(document.root_element());
    writer.finish().join("\n")
}

/// Text with entities decoded, for strings lifted out of HTML attributes or JSON.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    Html::parse_fragment(s).root_element().text().collect()
}

#[derive(Default)]
struct LineWriter {
    lines: Vec<String>,
    current: String,
}

impl LineWriter {
    fn walk(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => self.current.push_str(text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.element(child);
                    }
                }
                _ => {}
            }
        }
    }

    fn element(&mut self, el: ElementRef<'_>) {
        let name = el.value().name();
        match name {
            n if SKIPPED_ELEMENTS.contains(&n) => {}
            "a" => match el.value().attr("href") {
                Some(href) => {
                    let text = collapse(&el.text().collect::<String>()).replace(['[', ']'], "");
                    let href = href.trim().replace(' ', "%20");
                    self.current.push_str(&format!(" [{text}]({href}) "));
                }
                None => self.walk(el),
            },
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(2);
                let text = inline_markdown(el);
                if text.is_empty() {
                    self.flush();
                } else {
                    self.line(format!("{} {text}", "#".repeat(level)));
                }
            }
            "tr" => {
                let cells: Vec<String> = el
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|c| matches!(c.value().name(), "td" | "th"))
                    .map(|c| inline_markdown(c).replace('|', "/"))
                    .collect();
                if !cells.is_empty() {
                    self.line(format!("| {} |", cells.join(" | ")));
                }
            }
            "br" => self.flush(),
            n if BLOCK_ELEMENTS.contains(&n) => {
                self.flush();
                self.walk(el);
                self.flush();
            }
            _ => self.walk(el),
        }
    }

    /// A line of its own, separated from the surrounding text.
    fn line(&mut self, line: String) {
        self.flush();
        self.current = line;
        self.flush();
    }

    fn flush(&mut self) {
        let line = collapse(&self.current);
        self.current.clear();
        if !line.is_empty() {
            self.lines.push(line);
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.lines
    }
}

/// One element rendered as a single markdown line.
fn inline_markdown(el: ElementRef<'_>) -> String {
    let mut writer = LineWriter::default();
    writer.walk(el);
    writer.finish().join(" ")
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
