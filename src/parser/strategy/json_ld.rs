use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::Value;

use super::{Strategy, StrategyError};
use crate::model::CandidateRecord;
use crate::parser::blocks::decode_entities;
use crate::parser::{DocumentFormat, RawDocument};

static LD_JSON: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// schema.org `JobPosting` objects embedded as JSON-LD.
pub struct JsonLd;

impl Strategy for JsonLd {
    fn name(&self) -> &str {
        "json_ld"
    }

    fn extract(&self, doc: &RawDocument) -> Result<Vec<CandidateRecord>, StrategyError> {
        if doc.format != DocumentFormat::Html {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        let mut errors = Vec::new();
        let mut parsed_any = false;
        let html = Html::parse_document(&doc.body);
        for script in html.select(&LD_JSON) {
            let raw: String = script.text().collect();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(value) => {
                    parsed_any = true;
                    collect_postings(&value, &doc.url, &mut items);
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        if !parsed_any && !errors.is_empty() {
            return Err(StrategyError::Malformed(errors.join("; ")));
        }
        Ok(items)
    }
}

fn collect_postings(value: &Value, page_url: &str, out: &mut Vec<CandidateRecord>) {
    match value {
        Value::Array(items) => {
            for v in items {
                collect_postings(v, page_url, out);
            }
        }
        Value::Object(map) => {
            if is_job_posting(value) {
                out.push(posting_to_candidate(value, page_url));
            } else if let Some(graph) = map.get("@graph") {
                collect_postings(graph, page_url, out);
            } else if let Some(items) = map.get("itemListElement") {
                collect_postings(items, page_url, out);
            } else if let Some(item) = map.get("item") {
                collect_postings(item, page_url, out);
            }
        }
        _ => {}
    }
}

fn is_job_posting(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == "JobPosting",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("JobPosting")),
        _ => false,
    }
}

fn posting_to_candidate(posting: &Value, page_url: &str) -> CandidateRecord {
    let title = text(posting.get("title")).or_else(|| text(posting.get("name")));
    let url = text(posting.get("url"))
        .or_else(|| text(posting.get("sameAs")))
        .or_else(|| Some(page_url.to_string()));
    let department = text(posting.get("department"))
        .or_else(|| text(posting.get("occupationalCategory")))
        .or_else(|| text(posting.get("industry")));

    CandidateRecord {
        title: title.map(|t| decode_entities(&t)),
        url,
        location: location(posting),
        posted: text(posting.get("datePosted")),
        department,
    }
}

fn location(posting: &Value) -> Option<String> {
    let places: Vec<&Value> = match posting.get("jobLocation") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(v @ Value::Object(_)) => vec![v],
        _ => Vec::new(),
    };

    let rendered: Vec<String> = places
        .into_iter()
        .filter_map(|place| {
            let address = place.get("address")?;
            if let Some(s) = address.as_str() {
                return Some(s.to_string());
            }
            let parts: Vec<String> = ["addressLocality", "addressRegion", "addressCountry"]
                .iter()
                .filter_map(|k| text(address.get(*k)))
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        })
        .collect();

    if !rendered.is_empty() {
        return Some(rendered.join("; "));
    }
    match text(posting.get("jobLocationType")) {
        Some(t) if t.eq_ignore_ascii_case("TELECOMMUTE") => Some("Remote".to_string()),
        _ => None,
    }
}

/// A string, or the `name` of an object, or the first of an array.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => text(map.get("name")).or_else(|| text(map.get("value"))),
        Value::Array(items) => items.iter().find_map(|v| text(Some(v))),
        _ => None,
    }
}
