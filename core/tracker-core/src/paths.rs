//! Route matching against the enabled path prefixes.
//!
//! A prefix matches on path-segment boundaries only: `/user_dashboard` covers
//! `/user_dashboard` and `/user_dashboard/profile`, but not `/user_dashboards`.
//! Query strings and fragments are ignored for matching. The query is kept for
//! reporting; the fragment is dropped when the route is built.

/// A navigation target as reported by the host router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    path: String,
    title: String,
}

impl Route {
    pub fn new(path: impl Into<String>, title: impl Into<String>) -> Self {
        let mut path = path.into();
        if let Some(hash) = path.find('#') {
            path.truncate(hash);
        }
        Self {
            path,
            title: title.into(),
        }
    }

    /// Path including the query string, e.g. `/business_dashboard/menu?page=2`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// The path without query string.
    pub fn pathname(&self) -> &str {
        strip_query(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledPaths {
    prefixes: Vec<String>,
}

impl EnabledPaths {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(|prefix| normalize_path(prefix.as_ref()))
            .filter(|prefix| !prefix.is_empty())
            .collect();
        Self { prefixes }
    }

    /// Returns the enabled prefix that `path` falls under, if any.
    ///
    /// When prefixes nest, the longest one wins.
    pub fn matched_prefix(&self, path: &str) -> Option<&str> {
        let path = normalize_path(strip_query(path));
        self.prefixes
            .iter()
            .filter(|prefix| is_within(&path, prefix))
            .max_by_key(|prefix| prefix.len())
            .map(String::as_str)
    }
}

fn is_within(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// Strips trailing slashes (except for root "/").
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed == "/" {
        "/".to_string()
    } else {
        trimmed.trim_end_matches('/').to_string()
    }
}
