//! Per-bucket CORS for the public read route.
//!
//! A bucket's policy is an ordered list of rules; the first rule whose
//! allowed origins match the request `Origin` decides the response headers.
//! No match (or no `Origin`) means no CORS headers at all.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use tracing::debug;

use crate::{models::bucket::CorsRule, services::pattern_matcher::PatternMatcher};

/// Header values produced by a matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsHeaders {
    pub allow_origin: String,
    pub allow_methods: Option<String>,
    pub allow_headers: Option<String>,
    pub expose_headers: Option<String>,
}

/// Find the first rule allowing `origin` and build its headers.
pub fn resolve(origin: Option<&str>, rules: &[CorsRule]) -> Option<CorsHeaders> {
    let origin = origin.filter(|o| !o.is_empty())?;
    let rule = rules
        .iter()
        .find(|rule| PatternMatcher::origin_allowed(origin, &rule.allowed_origins))?;

    Some(CorsHeaders {
        allow_origin: origin.to_string(),
        allow_methods: join(&rule.allowed_methods),
        allow_headers: join(&rule.allowed_headers),
        expose_headers: join(&rule.expose_headers),
    })
}

fn join(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

impl CorsHeaders {
    /// Write the headers into a response. Values that are not valid header
    /// text are skipped.
    pub fn apply(&self, headers: &mut HeaderMap) {
        insert(headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, &self.allow_origin);
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        if let Some(methods) = &self.allow_methods {
            insert(headers, header::ACCESS_CONTROL_ALLOW_METHODS, methods);
        }
        if let Some(allowed) = &self.allow_headers {
            insert(headers, header::ACCESS_CONTROL_ALLOW_HEADERS, allowed);
        }
        if let Some(exposed) = &self.expose_headers {
            insert(headers, header::ACCESS_CONTROL_EXPOSE_HEADERS, exposed);
        }
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(err) => debug!(header = %name, error = %err, "skipping invalid CORS header value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(origins: &[&str], methods: &[&str]) -> CorsRule {
        CorsRule {
            allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
            allowed_methods: methods.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![
            rule(&["https://admin.example.com"], &["GET", "PUT"]),
            rule(&["https://*.example.com"], &["GET"]),
        ];
        let headers = resolve(Some("https://app.example.com"), &rules).unwrap();
        assert_eq!(headers.allow_origin, "https://app.example.com");
        assert_eq!(headers.allow_methods.as_deref(), Some("GET"));
        assert!(headers.allow_headers.is_none());

        let headers = resolve(Some("https://admin.example.com"), &rules).unwrap();
        assert_eq!(headers.allow_methods.as_deref(), Some("GET, PUT"));
    }

    #[test]
    fn no_origin_or_no_match() {
        let rules = vec![rule(&["https://example.com"], &["GET"])];
        assert!(resolve(None, &rules).is_none());
        assert!(resolve(Some(""), &rules).is_none());
        assert!(resolve(Some("https://evil.test"), &rules).is_none());
        assert!(resolve(Some("https://example.com"), &[]).is_none());
    }

    #[test]
    fn star_allows_any_origin() {
        let rules = vec![rule(&["*"], &[])];
        let headers = resolve(Some("http://localhost:3000"), &rules).unwrap();
        assert!(headers.allow_methods.is_none());
    }

    #[test]
    fn apply_sets_vary_and_lists() {
        let mut rules = vec![rule(&["*"], &["GET", "HEAD"])];
        rules[0].expose_headers = vec!["ETag".into()];
        let mut map = HeaderMap::new();
        resolve(Some("https://a.test"), &rules).unwrap().apply(&mut map);

        assert_eq!(map[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://a.test");
        assert_eq!(map[header::VARY], "Origin");
        assert_eq!(map[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, HEAD");
        assert_eq!(map[header::ACCESS_CONTROL_EXPOSE_HEADERS], "ETag");
        assert!(!map.contains_key(header::ACCESS_CONTROL_ALLOW_HEADERS));
    }
}
