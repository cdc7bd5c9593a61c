//! Cached, time-bounded regular expression matching for rule patterns.

use {
    crate::lock,
    log::{debug, warn},
    regex::{Regex, RegexBuilder},
    std::{
        collections::{HashMap, HashSet},
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    },
};

/// Compiled patterns kept before the cache is flushed.
pub const REGEX_CACHE_CAPACITY: usize = 100;
/// A match that takes longer than this counts as a non-match.
pub const REGEX_TIME_BUDGET: Duration = Duration::from_millis(100);
/// Upper bound on the compiled program size of one pattern.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Compiles rule regexes once and matches them case-insensitively.
///
/// Patterns that fail to compile, or whose match exceeds the time budget,
/// never match. Each such pattern is reported once.
pub struct PatternMatcher {
    cache: Mutex<HashMap<String, Option<Arc<Regex>>>>,
    reported: Mutex<HashSet<String>>,
    budget: Duration,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::with_budget(REGEX_TIME_BUDGET)
    }
}

impl PatternMatcher {
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            cache: Mutex::default(),
            reported: Mutex::default(),
            budget,
        }
    }

    pub fn is_match(&self, pattern: &str, haystack: &str) -> bool {
        let Some(regex) = self.compiled(pattern) else {
            return false;
        };

        let start = Instant::now();
        let matched = regex.is_match(haystack);
        let elapsed = start.elapsed();
        if elapsed > self.budget {
            self.report_once(pattern, || {
                format!(
                    "Regex /{pattern}/ took {}ms (budget {}ms); treating it as a non-match",
                    elapsed.as_millis(),
                    self.budget.as_millis()
                )
            });
            return false;
        }
        matched
    }

    /// Number of patterns currently cached, including failed ones.
    pub fn cached_patterns(&self) -> usize {
        lock(&self.cache).len()
    }

    fn compiled(&self, pattern: &str) -> Option<Arc<Regex>> {
        let mut cache = lock(&self.cache);
        if let Some(entry) = cache.get(pattern) {
            return entry.clone();
        }

        if cache.len() >= REGEX_CACHE_CAPACITY {
            debug!("Regex cache reached {} patterns, flushing", cache.len());
            cache.clear();
        }

        let entry = match RegexBuilder::new(pattern)
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
        {
            Ok(regex) => Some(Arc::new(regex)),
            Err(err) => {
                self.report_once(pattern, || format!("Invalid regex /{pattern}/: {err}"));
                None
            }
        };
        cache.insert(pattern.to_string(), entry.clone());
        entry
    }

    fn report_once(&self, pattern: &str, message: impl FnOnce() -> String) {
        if lock(&self.reported).insert(pattern.to_string()) {
            warn!("{}", message());
        }
    }
}
