use regex::Regex;
use url::Url;

use super::{Strategy, StrategyError};
use crate::model::CandidateRecord;
use crate::parser::blocks::{inline_links, is_date_like, Block};
use crate::parser::RawDocument;

/// How many blocks after a posting link may still describe it.
const SCAN_AHEAD: usize = 6;

const DEPARTMENT_HINTS: &[&str] = &[
    "engineering", "software", "sales", "marketing", "product", "design", "finance",
    "accounting", "operations", "support", "customer", "success", "legal", "people",
    "human resources", "talent", "recruiting", "data", "research", "security", "it",
    "infrastructure", "business development", "partnerships", "administration", "manufacturing",
];

/// Links whose URL matches a configured pattern, e.g. `/jobs/\d+`.
pub struct LinkPattern {
    pattern: String,
    compiled: Result<Regex, regex::Error>,
}

impl LinkPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            compiled: Regex::new(pattern),
        }
    }
}

impl Strategy for LinkPattern {
    fn name(&self) -> &str {
        "link_pattern"
    }

    fn extract(&self, doc: &RawDocument) -> Result<Vec<CandidateRecord>, StrategyError> {
        let re = self.compiled.as_ref().map_err(|e| StrategyError::InvalidPattern {
            pattern: self.pattern.clone(),
            source: e.clone(),
        })?;

        let blocks = doc.blocks();
        let mut items = Vec::new();
        let mut i = 0;
        while i < blocks.len() {
            if let Block::Link { text, url } = &blocks[i] {
                if !text.is_empty() && re.is_match(url) {
                    let (record, next) = describe(text, url, blocks, i + 1);
                    items.push(record);
                    i = next;
                    continue;
                }
            }
            i += 1;
        }
        Ok(items)
    }
}

/// Headings that carry a link: `### [Title](url)`.
pub struct HeadingLinks;

impl Strategy for HeadingLinks {
    fn name(&self) -> &str {
        "heading_links"
    }

    fn extract(&self, doc: &RawDocument) -> Result<Vec<CandidateRecord>, StrategyError> {
        let blocks = doc.blocks();
        let mut items = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            let Block::Heading { text, .. } = block else {
                continue;
            };
            if let Some((title, url)) = inline_links(text).into_iter().find(|(t, _)| !t.is_empty()) {
                let (record, _) = describe(&title, &url, blocks, i + 1);
                items.push(record);
            }
        }
        Ok(items)
    }
}

/// Every link with text on the page. Broad and noisy; belongs last in a chain.
pub struct AllLinks {
    pub same_host: bool,
}

impl Strategy for AllLinks {
    fn name(&self) -> &str {
        "all_links"
    }

    fn extract(&self, doc: &RawDocument) -> Result<Vec<CandidateRecord>, StrategyError> {
        let base = Url::parse(&doc.url).ok();
        let items = doc
            .links()
            .filter(|(text, url)| !text.is_empty() && is_navigable(url))
            .filter(|(_, url)| !self.same_host || same_host(base.as_ref(), url))
            .map(|(text, url)| CandidateRecord::new(text, url))
            .collect();
        Ok(items)
    }
}

fn is_navigable(url: &str) -> bool {
    let lower = url.trim().to_lowercase();
    !(lower.is_empty()
        || lower.starts_with('#')
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("javascript:"))
}

fn same_host(base: Option<&Url>, url: &str) -> bool {
    let Some(base) = base else {
        return true;
    };
    match base.join(url) {
        Ok(resolved) => resolved.host_str() == base.host_str(),
        Err(_) => false,
    }
}

/// Build a candidate from a posting link plus the text blocks right after it.
/// Returns the index of the first block not consumed.
fn describe(title: &str, url: &str, blocks: &[Block], start: usize) -> (CandidateRecord, usize) {
    let mut record = CandidateRecord::new(title, url);
    let mut j = start;
    while j < blocks.len() && j < start + SCAN_AHEAD {
        match &blocks[j] {
            Block::Empty => {}
            Block::Text(t) => {
                let mut consumed = false;
                for part in t.split(['·', '|', '•']).map(str::trim).filter(|p| !p.is_empty()) {
                    consumed |= assign(&mut record, part);
                }
                if !consumed {
                    break;
                }
            }
            _ => break,
        }
        j += 1;
    }
    (record, j)
}

fn assign(record: &mut CandidateRecord, part: &str) -> bool {
    if is_date_like(part) {
        if record.posted.is_none() {
            record.posted = Some(part.to_string());
            return true;
        }
        return false;
    }
    if record.department.is_none() && looks_like_department(part) {
        record.department = Some(part.to_string());
        return true;
    }
    if record.location.is_none() {
        record.location = Some(part.to_string());
        return true;
    }
    if record.department.is_none() {
        record.department = Some(part.to_string());
        return true;
    }
    false
}

fn looks_like_department(part: &str) -> bool {
    let lower = part.to_lowercase();
    lower.split(|c: char| !c.is_alphanumeric()).any(|w| DEPARTMENT_HINTS.contains(&w))
        || DEPARTMENT_HINTS.iter().any(|h| h.contains(' ') && lower.contains(h))
}
