//! Filter evaluation, ordering and pagination of discovery results

use regex::{Regex, RegexBuilder};
use sdk::discovery::{DiscoveryFilter, DiscoveryResult, SortOrder};
use sdk::errors::{AcquireError, Result};
use std::cmp::Ordering;

/// A [`DiscoveryFilter`] with its patterns compiled
#[derive(Debug, Clone)]
pub struct FilterMatcher {
    filter: DiscoveryFilter,
    name: Option<Regex>,
    author: Option<Regex>,
}

fn compile(pattern: Option<&str>, field: &str) -> Result<Option<Regex>> {
    pattern
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    AcquireError::InvalidArgument(format!("Invalid {} pattern: {}", field, e))
                })
        })
        .transpose()
}

impl FilterMatcher {
    /// Compile the patterns of `filter`
    ///
    /// # Errors
    ///
    /// Returns `AcquireError::InvalidArgument` for an invalid regex or a
    /// NaN minimum rating.
    pub fn new(filter: &DiscoveryFilter) -> Result<Self> {
        if filter.min_rating.is_some_and(f32::is_nan) {
            return Err(AcquireError::InvalidArgument(
                "min_rating must be a number".to_string(),
            ));
        }
        Ok(Self {
            name: compile(filter.name_pattern.as_deref(), "name")?,
            author: compile(filter.author_pattern.as_deref(), "author")?,
            filter: filter.clone(),
        })
    }

    pub fn matches(&self, result: &DiscoveryResult) -> bool {
        let f = &self.filter;

        if let Some(category) = &f.category {
            if result.category.as_ref() != Some(category) {
                return false;
            }
        }
        if !f.required_tags.iter().all(|tag| result.has_tag(tag)) {
            return false;
        }
        if f.excluded_tags.iter().any(|tag| result.has_tag(tag)) {
            return false;
        }
        if let Some(min) = f.min_rating {
            if result.rating.is_nan() || result.rating < min {
                return false;
            }
        }
        if let Some(max) = f.max_size {
            if result.size > max {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !name.is_match(&result.name) {
                return false;
            }
        }
        if let Some(author) = &self.author {
            match &result.author {
                Some(a) if author.is_match(a) => {}
                _ => return false,
            }
        }
        if f.verified_only && !result.verified {
            return false;
        }
        if f.free_only && !result.free {
            return false;
        }
        true
    }

    /// Filter, sort and paginate aggregated results.
    ///
    /// Returns the page and the number of matches before pagination.
    pub fn apply(&self, results: Vec<DiscoveryResult>) -> (Vec<DiscoveryResult>, usize) {
        let mut matched: Vec<DiscoveryResult> =
            results.into_iter().filter(|r| self.matches(r)).collect();
        sort_results(&mut matched, self.filter.sort);

        let total = matched.len();
        let page = paginate(matched, self.filter.page, self.filter.page_size);
        (page, total)
    }
}

/// Stable sort by the requested order; `Source` keeps the input order
pub fn sort_results(results: &mut [DiscoveryResult], order: SortOrder) {
    match order {
        SortOrder::Source => {}
        SortOrder::Name => {
            results.sort_by_key(|r| r.name.to_lowercase());
        }
        SortOrder::Rating => {
            results.sort_by(|a, b| b.rating.total_cmp(&a.rating));
        }
        SortOrder::Size => {
            results.sort_by_key(|r| r.size);
        }
        SortOrder::Version => {
            results.sort_by(|a, b| compare_versions(&b.version, &a.version));
        }
    }
}

/// Semantic version order, falling back to string order for non-semver input
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn paginate(results: Vec<DiscoveryResult>, page: usize, page_size: usize) -> Vec<DiscoveryResult> {
    if page_size == 0 {
        return results;
    }
    results
        .into_iter()
        .skip(page.saturating_mul(page_size))
        .take(page_size)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, version: &str, rating: f32, size: u64) -> DiscoveryResult {
        DiscoveryResult {
            plugin_id: name.to_lowercase(),
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
            author: Some("Acme Corp".to_string()),
            category: Some("logging".to_string()),
            tags: vec!["async".to_string()],
            download_url: format!("https://good.example.com/{}.bin", name),
            checksum: None,
            signature: None,
            size,
            rating,
            verified: true,
            free: true,
            source_id: "src".to_string(),
        }
    }

    #[test]
    fn test_matches_each_criterion() {
        let r = result("Logger", "1.0.0", 4.0, 100);

        let cases = [
            (DiscoveryFilter::new().with_category("logging"), true),
            (DiscoveryFilter::new().with_category("metrics"), false),
            (DiscoveryFilter::new().require_tag("async"), true),
            (DiscoveryFilter::new().require_tag("sync"), false),
            (DiscoveryFilter::new().exclude_tag("async"), false),
            (DiscoveryFilter::new().with_min_rating(4.0), true),
            (DiscoveryFilter::new().with_min_rating(4.5), false),
            (DiscoveryFilter::new().with_max_size(100), true),
            (DiscoveryFilter::new().with_max_size(99), false),
            (DiscoveryFilter::new().with_name_pattern("^log"), true),
            (DiscoveryFilter::new().with_name_pattern("^metric"), false),
            (DiscoveryFilter::new().with_author_pattern("acme"), true),
            (DiscoveryFilter::new().verified_only().free_only(), true),
        ];
        for (filter, expected) in cases {
            let matcher = FilterMatcher::new(&filter).unwrap();
            assert_eq!(matcher.matches(&r), expected, "{:?}", filter);
        }
    }

    #[test]
    fn test_flags_only_checked_when_requested() {
        let mut r = result("Logger", "1.0.0", 4.0, 100);
        r.verified = false;
        r.free = false;

        assert!(FilterMatcher::new(&DiscoveryFilter::new()).unwrap().matches(&r));
        assert!(!FilterMatcher::new(&DiscoveryFilter::new().verified_only())
            .unwrap()
            .matches(&r));
        assert!(!FilterMatcher::new(&DiscoveryFilter::new().free_only())
            .unwrap()
            .matches(&r));
    }

    #[test]
    fn test_unrated_results_fail_min_rating() {
        let r = result("Logger", "1.0.0", f32::NAN, 100);
        let rated = FilterMatcher::new(&DiscoveryFilter::new().with_min_rating(0.0)).unwrap();
        assert!(!rated.matches(&r));
        assert!(FilterMatcher::new(&DiscoveryFilter::new()).unwrap().matches(&r));

        let err = FilterMatcher::new(&DiscoveryFilter::new().with_min_rating(f32::NAN)).unwrap_err();
        assert!(matches!(err, AcquireError::InvalidArgument(_)));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = FilterMatcher::new(&DiscoveryFilter::new().with_name_pattern("(")).unwrap_err();
        assert!(matches!(err, AcquireError::InvalidArgument(_)));
    }

    #[test]
    fn test_version_sort_uses_semver() {
        let mut results = vec![
            result("a", "1.9.0", 0.0, 0),
            result("b", "1.10.0", 0.0, 0),
            result("c", "not-a-version", 0.0, 0),
        ];
        sort_results(&mut results, SortOrder::Version);
        let versions: Vec<&str> = results.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["1.10.0", "1.9.0", "not-a-version"]);
    }

    #[test]
    fn test_apply_paginates_after_counting() {
        let results = (0..5)
            .map(|i| result(&format!("p{}", i), "1.0.0", i as f32, 0))
            .collect();
        let matcher = FilterMatcher::new(
            &DiscoveryFilter::new()
                .sorted_by(SortOrder::Rating)
                .with_page(1, 2),
        )
        .unwrap();

        let (page, total) = matcher.apply(results);
        assert_eq!(total, 5);
        let names: Vec<&str> = page.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["p2", "p1"]);
    }

    proptest::proptest! {
        #[test]
        fn test_apply_keeps_only_matches(
            entries in proptest::collection::vec((0u8..50, 0u64..2000, proptest::bool::ANY), 0..24),
            min_rating in 0u8..50,
            max_size in 0u64..2000,
            page in 0usize..4,
            page_size in 0usize..6,
        ) {
            let results: Vec<_> = entries
                .iter()
                .enumerate()
                .map(|(i, (rating, size, verified))| {
                    let mut r = result(&format!("p{}", i), "1.0.0", *rating as f32 / 10.0, *size);
                    r.verified = *verified;
                    r
                })
                .collect();
            let filter = DiscoveryFilter::new()
                .with_min_rating(min_rating as f32 / 10.0)
                .with_max_size(max_size)
                .verified_only()
                .with_page(page, page_size);
            let matcher = FilterMatcher::new(&filter).unwrap();

            let expected = results.iter().filter(|r| matcher.matches(r)).count();
            let (kept, total) = matcher.apply(results);

            proptest::prop_assert_eq!(total, expected);
            if page_size > 0 {
                proptest::prop_assert!(kept.len() <= page_size);
            } else {
                proptest::prop_assert_eq!(kept.len(), total);
            }
            for r in &kept {
                proptest::prop_assert!(r.verified);
                proptest::prop_assert!(r.size <= max_size);
                proptest::prop_assert!(r.rating >= min_rating as f32 / 10.0);
            }
        }
    }
}
