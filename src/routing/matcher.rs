//! URL host matching.
//!
//! # Responsibilities
//! - Match a URL host against a domain (exact or subdomain, case-insensitive)
//! - Decide whether a URL is allowed by the domain allow-list
//! - Look up mock failure rules for a URL
//!
//! # Design Decisions
//! - Host matching is case-insensitive
//! - "example.com" matches "example.com" and "api.example.com", never
//!   "badexample.com"
//! - Empty allow-list = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use url::Url;

/// Trait for matching request URLs against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the URL matches this condition.
    fn matches(&self, url: &Url) -> bool;
}

/// Matches a domain and its subdomains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMatcher {
    domain: String,
}

impl HostMatcher {
    /// Create a new host matcher.
    /// The domain is normalized to lowercase for case-insensitive matching.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into().trim().trim_start_matches('.').to_lowercase(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn matches_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        host == self.domain
            || host
                .strip_suffix(&self.domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, url: &Url) -> bool {
        url.host_str()
            .map(|h| self.matches_host(h))
            .unwrap_or(false)
    }
}

/// Domains requests may target.
#[derive(Debug, Clone, Default)]
pub struct DomainAllowList {
    domains: Vec<HostMatcher>,
}

impl DomainAllowList {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(HostMatcher::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl Matcher for DomainAllowList {
    fn matches(&self, url: &Url) -> bool {
        self.domains.is_empty() || self.domains.iter().any(|d| d.matches(url))
    }
}

/// Parsed `host->status` rules used to fake outcomes without I/O.
#[derive(Debug, Clone, Default)]
pub struct MockFailureRules {
    rules: Vec<(HostMatcher, u16)>,
}

impl MockFailureRules {
    /// Parse whitespace-separated `host->status` rules.
    ///
    /// Status `0` stands for a connection error.
    pub fn parse(patterns: &str) -> Result<Self, String> {
        let mut rules = Vec::new();
        for rule in patterns.split_whitespace() {
            let (host, status) = rule
                .split_once("->")
                .ok_or_else(|| format!("rule '{}' is missing '->'", rule))?;
            if host.is_empty() {
                return Err(format!("rule '{}' has an empty host", rule));
            }
            let status: u16 = status
                .parse()
                .map_err(|_| format!("rule '{}' has an invalid status", rule))?;
            if status != 0 && !(100..=599).contains(&status) {
                return Err(format!("rule '{}' has an out of range status", rule));
            }
            rules.push((HostMatcher::new(host), status));
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Status to fake for this URL, first matching rule wins.
    pub fn find(&self, url: &Url) -> Option<u16> {
        self.rules
            .iter()
            .find(|(matcher, _)| matcher.matches(url))
            .map(|(_, status)| *status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("Example.com");

        assert!(matcher.matches(&url("http://example.com/a")));
        assert!(matcher.matches(&url("https://API.EXAMPLE.COM/")));
        assert!(!matcher.matches(&url("http://badexample.com/")));
        assert!(!matcher.matches(&url("http://example.com.evil.org/")));
    }

    #[test]
    fn test_allow_list() {
        let open = DomainAllowList::default();
        assert!(open.matches(&url("http://anything.net/")));

        let list = DomainAllowList::new(["example.com", "localhost"]);
        assert!(list.matches(&url("http://localhost:8080/x")));
        assert!(list.matches(&url("https://www.example.com/")));
        assert!(!list.matches(&url("https://example.org/")));
    }

    #[test]
    fn test_mock_failure_rules() {
        let rules = MockFailureRules::parse("flaky.test->0  busy.test->503").unwrap();
        assert_eq!(rules.find(&url("https://www.flaky.test/")), Some(0));
        assert_eq!(rules.find(&url("https://busy.test/")), Some(503));
        assert_eq!(rules.find(&url("https://example.com/")), None);

        assert!(MockFailureRules::parse("").unwrap().is_empty());
        assert!(MockFailureRules::parse("example.com").is_err());
        assert!(MockFailureRules::parse("example.com->x").is_err());
        assert!(MockFailureRules::parse("example.com->42").is_err());
        assert!(MockFailureRules::parse("->503").is_err());
    }
}
