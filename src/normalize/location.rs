/// City / region / country derived from a free-text location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub city: String,
    pub region: String,
    pub country: String,
}

/// (alias, canonical name). Aliases are lowercase.
const COUNTRIES: &[(&str, &str)] = &[
    ("us", "United States"),
    ("usa", "United States"),
    ("u.s.", "United States"),
    ("u.s.a.", "United States"),
    ("united states", "United States"),
    ("united states of america", "United States"),
    ("uk", "United Kingdom"),
    ("u.k.", "United Kingdom"),
    ("gb", "United Kingdom"),
    ("great britain", "United Kingdom"),
    ("england", "United Kingdom"),
    ("scotland", "United Kingdom"),
    ("united kingdom", "United Kingdom"),
    ("canada", "Canada"),
    ("mexico", "Mexico"),
    ("brazil", "Brazil"),
    ("argentina", "Argentina"),
    ("ireland", "Ireland"),
    ("germany", "Germany"),
    ("deutschland", "Germany"),
    ("france", "France"),
    ("spain", "Spain"),
    ("portugal", "Portugal"),
    ("italy", "Italy"),
    ("netherlands", "Netherlands"),
    ("the netherlands", "Netherlands"),
    ("belgium", "Belgium"),
    ("switzerland", "Switzerland"),
    ("austria", "Austria"),
    ("sweden", "Sweden"),
    ("norway", "Norway"),
    ("denmark", "Denmark"),
    ("finland", "Finland"),
    ("poland", "Poland"),
    ("czech republic", "Czech Republic"),
    ("romania", "Romania"),
    ("ukraine", "Ukraine"),
    ("israel", "Israel"),
    ("uae", "United Arab Emirates"),
    ("united arab emirates", "United Arab Emirates"),
    ("india", "India"),
    ("china", "China"),
    ("japan", "Japan"),
    ("south korea", "South Korea"),
    ("singapore", "Singapore"),
    ("australia", "Australia"),
    ("new zealand", "New Zealand"),
    ("south africa", "South Africa"),
    ("nigeria", "Nigeria"),
    ("kenya", "Kenya"),
];

const WORK_MODES: &[&str] = &["remote", "hybrid", "on-site", "onsite", "in office", "in-office", "anywhere"];

pub fn country_alias(segment: &str) -> Option<&'static str> {
    let key = segment.trim().trim_end_matches('.').to_lowercase();
    COUNTRIES
        .iter()
        .find(|(alias, _)| alias.trim_end_matches('.') == key)
        .map(|(_, name)| *name)
}

/// Comma-segmented best effort: city, region, then country.
/// With several locations (`;`, `|`, `/`, " or ") only the first usable one is parsed.
pub fn parse(raw: &str, default_country: Option<&str>) -> Location {
    let mut segments: Vec<String> = raw
        .split([';', '|', '/'])
        .flat_map(|alt| alt.split(" or "))
        .map(segments_of)
        .find(|s| !s.is_empty())
        .unwrap_or_default();

    let mut country = String::new();
    if let Some(idx) = segments.iter().rposition(|s| country_alias(s).is_some()) {
        country = country_alias(&segments[idx]).unwrap_or_default().to_string();
        segments.truncate(idx);
    }

    let city = segments.first().cloned().unwrap_or_default();
    let region = segments.get(1).cloned().unwrap_or_default();
    if country.is_empty() && segments.len() > 2 {
        country = segments[2..].join(", ");
    }
    if country.is_empty() {
        country = default_country.unwrap_or_default().to_string();
    }

    Location { city, region, country }
}

fn segments_of(alternative: &str) -> Vec<String> {
    alternative
        .replace(['(', ')'], ",")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !is_work_mode(s))
        .map(str::to_string)
        .collect()
}

fn is_work_mode(segment: &str) -> bool {
    let lower = segment.to_lowercase();
    WORK_MODES.iter().any(|m| lower == *m || lower.starts_with(&format!("{m} ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(city: &str, region: &str, country: &str) -> Location {
        Location {
            city: city.into(),
            region: region.into(),
            country: country.into(),
        }
    }

    #[test]
    fn city_region_country() {
        assert_eq!(parse("Toronto, ON, Canada", None), loc("Toronto", "ON", "Canada"));
        assert_eq!(parse("Austin, TX, USA", None), loc("Austin", "TX", "United States"));
    }

    #[test]
    fn explicit_country_marker_anywhere() {
        assert_eq!(parse("Berlin, Germany", None), loc("Berlin", "", "Germany"));
        assert_eq!(parse("UK", None), loc("", "", "United Kingdom"));
    }

    #[test]
    fn trailing_segments_become_country() {
        assert_eq!(parse("Springfield, Region 5, Freedonia", None), loc("Springfield", "Region 5", "Freedonia"));
    }

    #[test]
    fn default_country_only_when_none_detected() {
        assert_eq!(parse("Chicago, IL", Some("United States")), loc("Chicago", "IL", "United States"));
        assert_eq!(parse("Paris, France", Some("United States")), loc("Paris", "", "France"));
        assert_eq!(parse("", Some("Canada")), loc("", "", "Canada"));
    }

    #[test]
    fn work_modes_and_multiple_locations() {
        assert_eq!(parse("Remote, Canada", None), loc("", "", "Canada"));
        assert_eq!(parse("London, UK; New York, NY", None), loc("London", "", "United Kingdom"));
        assert_eq!(parse("Hybrid (Dublin, Ireland)", None), loc("Dublin", "", "Ireland"));
    }
}
