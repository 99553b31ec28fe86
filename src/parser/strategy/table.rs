use super::{Strategy, StrategyError};
use crate::model::CandidateRecord;
use crate::parser::blocks::{inline_links, is_date_like, Block};
use crate::parser::RawDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Title,
    Location,
    Department,
    Posted,
    Other,
}

impl Column {
    fn from_header(cell: &str) -> Self {
        let h = cell.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| h.contains(w));
        if has(&["title", "position", "role", "job", "opening", "vacanc"]) {
            Column::Title
        } else if has(&["location", "office", "city", "where", "country"]) {
            Column::Location
        } else if has(&["department", "team", "category", "function", "division"]) {
            Column::Department
        } else if has(&["date", "posted", "published"]) {
            Column::Posted
        } else {
            Column::Other
        }
    }
}

/// Table rows that contain a link; a link-free first row names the columns.
pub struct Table;

impl Strategy for Table {
    fn name(&self) -> &str {
        "table"
    }

    fn extract(&self, doc: &RawDocument) -> Result<Vec<CandidateRecord>, StrategyError> {
        let mut header: Option<Vec<Column>> = None;
        let mut in_table = false;
        let mut items = Vec::new();

        for block in doc.blocks() {
            let Block::TableRow(cells) = block else {
                if !matches!(block, Block::Empty) {
                    in_table = false;
                    header = None;
                }
                continue;
            };

            let has_link = cells.iter().any(|c| !inline_links(c).is_empty());
            if !in_table && !has_link {
                header = Some(cells.iter().map(|c| Column::from_header(c)).collect());
                in_table = true;
                continue;
            }
            in_table = true;

            if let Some(record) = row_to_candidate(cells, header.as_deref()) {
                items.push(record);
            }
        }
        Ok(items)
    }
}

fn row_to_candidate(cells: &[String], header: Option<&[Column]>) -> Option<CandidateRecord> {
    let column = |i: usize| header.and_then(|h| h.get(i).copied());

    let title_idx = (0..cells.len())
        .find(|&i| column(i) == Some(Column::Title) && !inline_links(&cells[i]).is_empty())
        .or_else(|| cells.iter().position(|c| !inline_links(c).is_empty()))?;
    let (title, url) = inline_links(&cells[title_idx]).into_iter().next()?;

    let mut record = CandidateRecord::new(title, url);
    for (i, cell) in cells.iter().enumerate() {
        if i == title_idx || cell.is_empty() {
            continue;
        }
        let value = Some(plain(cell));
        match column(i) {
            Some(Column::Location) => record.location = value,
            Some(Column::Department) => record.department = value,
            Some(Column::Posted) => record.posted = value,
            Some(Column::Title) | Some(Column::Other) => {}
            None if is_date_like(cell) => record.posted = value,
            None if record.location.is_none() => record.location = value,
            None if record.department.is_none() => record.department = value,
            None => {}
        }
    }
    Some(record)
}

/// Cell text with any markdown links reduced to their text.
fn plain(cell: &str) -> String {
    let mut out = cell.to_string();
    for (text, url) in inline_links(cell) {
        out = out.replace(&format!("[{text}]({url})"), &text);
    }
    out.trim().to_string()
}
