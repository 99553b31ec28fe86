pub mod identity;
pub mod location;

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use url::Url;

use crate::config::SourceConfig;
use crate::model::{CandidateRecord, JobStatus, NormalizedRecord};
use crate::parser::filter::TitleFilter;

static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*|__|`|\\([\\`*_{}\[\]()#+\-.!])").unwrap());

/// Collapse whitespace and drop leftover markdown emphasis.
pub fn clean_text(s: &str) -> String {
    let s = MARKUP_RE.replace_all(s, "$1");
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Absolute form of `url` relative to the page it was found on, without fragment.
pub fn resolve_url(page_url: &str, url: &str) -> String {
    let url = url.trim();
    let resolved = match Url::parse(page_url) {
        Ok(base) => base.join(url),
        Err(_) => Url::parse(url),
    };
    match resolved {
        Ok(mut u) => {
            u.set_fragment(None);
            u.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// Turns a source's candidates into canonical records.
pub struct Normalizer {
    source_name: String,
    default_country: Option<String>,
    id_pattern: Option<Regex>,
    filter: TitleFilter,
}

impl Normalizer {
    pub fn for_source(source: &SourceConfig) -> Self {
        let id_pattern = source.id_pattern.as_deref().and_then(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(source = %source.name, "ignoring invalid id_pattern: {e}");
                None
            }
        });
        Self {
            source_name: source.name.clone(),
            default_country: source.default_country.clone(),
            id_pattern,
            filter: TitleFilter::default().with_exclusions(&source.exclude_titles),
        }
    }

    /// `None` when the candidate has no usable title.
    pub fn normalize(&self, candidate: &CandidateRecord, page_url: &str) -> Option<NormalizedRecord> {
        let title = field(&candidate.title);
        if title.is_empty() || self.filter.is_navigational(&title) {
            return None;
        }

        let apply_url = candidate
            .url
            .as_deref()
            .map(|u| resolve_url(page_url, u))
            .unwrap_or_default();
        let location = field(&candidate.location);
        let place = location::parse(&location, self.default_country.as_deref());
        let key = identity::natural_key(&title, &apply_url, self.id_pattern.as_ref());

        Some(NormalizedRecord {
            external_id: identity::external_id(&self.source_name, &key),
            source_name: self.source_name.clone(),
            title,
            apply_url,
            location,
            city: place.city,
            region: place.region,
            country: place.country,
            department: field(&candidate.department),
            posted_at: field(&candidate.posted),
            status: JobStatus::Active,
        })
    }
}

fn field(value: &Option<String>) -> String {
    value.as_deref().map(clean_text).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        let mut source = SourceConfig::new("acme", "https://acme.example/careers");
        source.default_country = Some("United States".into());
        Normalizer::for_source(&source)
    }

    #[test]
    fn cleans_and_derives_fields() {
        let c = CandidateRecord::new("  **Senior**   Data\nEngineer ", "/jobs/4821#apply")
            .with_location("Austin, TX")
            .with_department(" Data ")
            .with_posted("Posted 2 days ago");
        let r = normalizer().normalize(&c, "https://acme.example/careers?page=2").unwrap();
        assert_eq!(r.title, "Senior Data Engineer");
        assert_eq!(r.apply_url, "https://acme.example/jobs/4821");
        assert_eq!((r.city.as_str(), r.region.as_str()), ("Austin", "TX"));
        assert_eq!(r.country, "United States");
        assert_eq!(r.department, "Data");
        assert_eq!(r.posted_at, "Posted 2 days ago");
        assert_eq!(r.status, JobStatus::Active);
        assert_eq!(
            r.external_id,
            identity::external_id("acme", &identity::NaturalKey::Posting("4821".into()))
        );
    }

    #[test]
    fn rejects_empty_and_navigational_titles() {
        let n = normalizer();
        assert!(n.normalize(&CandidateRecord::new("   ", "/jobs/1"), "https://acme.example").is_none());
        assert!(n.normalize(&CandidateRecord::new("Log in", "/login"), "https://acme.example").is_none());
        assert!(n.normalize(&CandidateRecord::default(), "https://acme.example").is_none());
    }

    #[test]
    fn missing_fields_degrade_to_empty() {
        let c = CandidateRecord {
            title: Some("Courier".into()),
            ..Default::default()
        };
        let r = normalizer().normalize(&c, "https://acme.example/careers").unwrap();
        assert_eq!(r.apply_url, "");
        assert_eq!(r.location, "");
        assert_eq!(r.city, "");
        assert_eq!(r.country, "United States");
    }

    #[test]
    fn invalid_id_pattern_falls_back_to_heuristics() {
        let mut source = SourceConfig::new("acme", "https://acme.example/careers");
        source.id_pattern = Some("(".into());
        let r = Normalizer::for_source(&source)
            .normalize(&CandidateRecord::new("Welder", "https://acme.example/jobs/99812"), "")
            .unwrap();
        assert_eq!(r.external_id, identity::external_id("acme", &identity::NaturalKey::Posting("99812".into())));
    }

    #[test]
    fn resolve_keeps_unparseable_urls() {
        assert_eq!(resolve_url("not a url", "also not"), "also not");
        assert_eq!(resolve_url("https://a.example/x/", "../y"), "https://a.example/y");
    }
}
