use std::collections::HashSet;

use crate::model::CandidateRecord;
use crate::normalize::clean_text;

pub const MIN_TITLE_CHARS: usize = 3;
pub const MAX_TITLE_CHARS: usize = 200;

/// Link texts that are site chrome, not postings.
pub const NAVIGATIONAL_TITLES: &[&str] = &[
    "home", "about", "about us", "login", "log in", "sign in", "sign up", "signup", "register",
    "logout", "log out", "contact", "contact us", "careers", "jobs", "job search", "search",
    "search jobs", "all jobs", "open positions", "view all jobs", "see all jobs", "view all",
    "see all", "privacy", "privacy policy", "terms", "terms of use", "terms of service", "cookies",
    "cookie policy", "cookie settings", "accessibility", "next", "previous", "prev", "back",
    "menu", "skip to content", "skip to main content", "apply", "apply now", "learn more",
    "read more", "blog", "news", "press", "faq", "help", "support", "benefits", "our team",
    "our culture", "life at", "locations", "teams", "english", "load more", "show more",
];

/// Decides which candidates are non-trivial.
#[derive(Debug, Clone)]
pub struct TitleFilter {
    excluded: HashSet<String>,
    min_chars: usize,
    max_chars: usize,
}

impl Default for TitleFilter {
    fn default() -> Self {
        Self {
            excluded: NAVIGATIONAL_TITLES.iter().map(|s| s.to_string()).collect(),
            min_chars: MIN_TITLE_CHARS,
            max_chars: MAX_TITLE_CHARS,
        }
    }
}

impl TitleFilter {
    pub fn with_exclusions<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded.extend(extra.into_iter().map(|s| exclusion_key(s.as_ref())));
        self
    }

    pub fn is_navigational(&self, title: &str) -> bool {
        self.excluded.contains(&exclusion_key(title))
    }

    pub fn accepts(&self, title: &str) -> bool {
        let cleaned = clean_text(title);
        let n = cleaned.chars().count();
        n >= self.min_chars && n <= self.max_chars && !self.is_navigational(&cleaned)
    }

    /// Keep non-trivial candidates, dropping repeats of the same (title, url).
    pub fn retain(&self, candidates: Vec<CandidateRecord>) -> Vec<CandidateRecord> {
        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|c| {
                let Some(title) = c.title.as_deref() else {
                    return false;
                };
                if !self.accepts(title) {
                    return false;
                }
                let key = (
                    clean_text(title).to_lowercase(),
                    c.url.as_deref().map(str::trim).unwrap_or("").to_string(),
                );
                seen.insert(key)
            })
            .collect()
    }
}

fn exclusion_key(title: &str) -> String {
    clean_text(title)
        .to_lowercase()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}
