use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

static WHOLE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\d{4,}|[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})$").unwrap()
});
static EMBEDDED_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[_-])([a-z]{0,3}\d{5,}|[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})(?:$|[_-])").unwrap()
});

const ID_PARAMS: &[&str] = &[
    "gh_jid", "jobid", "job_id", "jid", "postingid", "posting_id", "reqid", "req_id",
    "requisitionid", "requisition_id", "vacancyid", "id",
];
const LISTING_SEGMENTS: &[&str] = &[
    "job", "jobs", "position", "positions", "posting", "postings", "opening", "openings",
    "vacancy", "vacancies", "career", "careers", "requisition", "requisitions", "role", "roles",
];

/// The most specific stable token identifying a posting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NaturalKey {
    /// Posting id embedded in the URL.
    Posting(String),
    /// Hash of title and URL when no id is available.
    Content(String),
}

impl NaturalKey {
    pub fn as_key(&self) -> String {
        match self {
            NaturalKey::Posting(id) => format!("posting:{id}"),
            NaturalKey::Content(hash) => format!("content:{hash}"),
        }
    }
}

pub fn natural_key(title: &str, url: &str, id_pattern: Option<&Regex>) -> NaturalKey {
    match posting_id(url, id_pattern) {
        Some(id) => NaturalKey::Posting(id),
        None => NaturalKey::Content(sha256_hex(&format!(
            "{}\n{}",
            title.trim().to_lowercase(),
            canonical_url(url)
        ))),
    }
}

/// Pure function of `(source_name, natural_key)`.
pub fn external_id(source_name: &str, key: &NaturalKey) -> String {
    let digest = sha256_hex(&format!("{}\u{0}{}", source_name, key.as_key()));
    digest[..32].to_string()
}

pub fn posting_id(url: &str, id_pattern: Option<&Regex>) -> Option<String> {
    if let Some(re) = id_pattern {
        if let Some(m) = re.captures(url).and_then(|c| c.get(1)) {
            if !m.as_str().is_empty() {
                return Some(m.as_str().to_string());
            }
        }
    }

    let parsed = Url::parse(url).ok()?;

    for (k, v) in parsed.query_pairs() {
        let key = k.to_lowercase();
        if ID_PARAMS.contains(&key.as_str()) && is_token(&v) {
            return Some(v.to_string());
        }
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    // Segment right after /jobs/, /positions/, ...
    for pair in segments.windows(2) {
        if LISTING_SEGMENTS.contains(&pair[0].to_lowercase().as_str()) {
            let seg = pair[1];
            if seg.chars().all(|c| c.is_ascii_digit()) || WHOLE_ID_RE.is_match(seg) {
                return Some(seg.to_string());
            }
            if let Some(c) = EMBEDDED_ID_RE.captures(seg) {
                return Some(c[1].to_string());
            }
        }
    }

    let last = segments.last()?;
    if WHOLE_ID_RE.is_match(last) {
        return Some(last.to_string());
    }
    EMBEDDED_ID_RE.captures(last).map(|c| c[1].to_string())
}

fn is_token(v: &str) -> bool {
    !v.is_empty() && v.len() <= 64 && v.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// URL without fragment and trailing slash, for content hashing.
fn canonical_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut u) => {
            u.set_fragment(None);
            u.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => url.trim().trim_end_matches('/').to_string(),
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn posting_ids_from_common_url_shapes() {
        let cases = [
            ("https://boards.greenhouse.io/acme/jobs/4412203", "4412203"),
            ("https://acme.example/careers?gh_jid=5521", "5521"),
            ("https://acme.example/apply?jobId=AB-77", "AB-77"),
            ("https://x/job/42", "42"),
            ("https://jobs.lever.co/acme/5f3c1a2e-9b7d-4c11-8e0a-1f2b3c4d5e6f", "5f3c1a2e-9b7d-4c11-8e0a-1f2b3c4d5e6f"),
            ("https://acme.wd5.myworkdayjobs.com/en-US/External/job/Berlin/Data-Engineer_R104233", "R104233"),
            ("https://acme.example/positions/senior-engineer-883112", "883112"),
        ];
        for (url, id) in cases {
            assert_eq!(posting_id(url, None).as_deref(), Some(id), "{url}");
        }
    }

    #[test]
    fn no_id_in_plain_urls() {
        for url in ["https://acme.example/careers/backend-engineer", "https://acme.example/2024/jobs", "not a url"] {
            assert_eq!(posting_id(url, None), None, "{url}");
        }
    }

    #[test]
    fn configured_pattern_wins() {
        let re = Regex::new(r"/p/([a-z]+)").unwrap();
        assert_eq!(posting_id("https://acme.example/p/abc?jobId=9999", Some(&re)).as_deref(), Some("abc"));
    }

    #[test]
    fn identity_is_stable_and_source_scoped() {
        let k1 = natural_key("Engineer", "https://x/job/42", None);
        let k2 = natural_key("Engineer (updated)", "https://x/job/42?utm=feed", None);
        assert_eq!(k1, NaturalKey::Posting("42".into()));
        assert_eq!(external_id("x", &k1), external_id("x", &k2));
        assert_ne!(external_id("x", &k1), external_id("y", &k1));
        assert_eq!(external_id("x", &k1).len(), 32);
    }

    #[test]
    fn content_key_ignores_fragment_and_case() {
        let a = natural_key("Barista", "https://cafe.example/careers/barista#apply", None);
        let b = natural_key("barista ", "https://cafe.example/careers/barista/", None);
        assert!(matches!(a, NaturalKey::Content(_)));
        assert_eq!(a, b);
    }

    #[test]
    fn no_collisions_across_synthetic_corpus() {
        let mut ids = HashSet::new();
        for i in 0..20_000 {
            let (title, url) = if i % 2 == 0 {
                (format!("Role {i}"), format!("https://corp.example/jobs/{}", 100_000 + i))
            } else {
                (format!("Role {i}"), format!("https://corp.example/careers/role-{i}"))
            };
            let key = natural_key(&title, &url, None);
            assert!(ids.insert(external_id("corp", &key)), "collision at {i}");
        }
    }
}
