//! Link detection and rewriting.

use std::collections::HashMap;
use std::ops::Range;

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, warn};

use embebot_store::GuildSettings;

/// One built-in embed-fixing service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Service {
    pub name: &'static str,
    pub display: &'static str,
    /// Host fragment replaced in matched links.
    pub base: &'static str,
    pub default_endpoint: &'static str,
    pattern: &'static str,
}

pub const SERVICES: [Service; 5] = [
    Service {
        name: "twitter",
        display: "Twitter",
        base: "twitter.com",
        default_endpoint: "vxtwitter.com",
        pattern: r"https?://(?:www\.)?twitter\.com/[\w-]+/status/\d+",
    },
    Service {
        name: "x",
        display: "X",
        base: "x.com",
        default_endpoint: "vxtwitter.com",
        pattern: r"https?://(?:www\.)?x\.com/[\w-]+/status/\d+",
    },
    Service {
        name: "tiktok",
        display: "TikTok",
        base: "tiktok.com",
        default_endpoint: "vxtiktok.com",
        pattern: r"https?://(?:www\.|vm\.)?tiktok\.com/(?:@[\w.-]+/video/\d+|t/[\w-]+)/?",
    },
    Service {
        name: "instagram",
        display: "Instagram",
        base: "instagram.com",
        default_endpoint: "ddinstagram.com",
        pattern: r"https://www\.instagram\.com/(?:reel|p)/[\w-]+/?",
    },
    Service {
        name: "reddit",
        display: "Reddit",
        base: "reddit.com",
        default_endpoint: "vxreddit.com",
        pattern: r"https?://(?:www\.)?reddit\.com/(?:r/[\w-]+/comments/[\w-]+(?:/[\w-]*)?|u/[\w-]+|[\w/]+)?(?:\?\S*)?",
    },
];

pub fn service(name: &str) -> Option<&'static Service> {
    SERVICES.iter().find(|s| s.name == name)
}

pub fn service_names() -> impl Iterator<Item = &'static str> {
    SERVICES.iter().map(|s| s.name)
}

/// A link found in a message and its embed-friendly replacement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rewrite {
    /// Service name, or the matched host for a custom domain.
    pub source: String,
    pub original: String,
    pub rewritten: String,
}

/// Compiled custom-domain patterns kept before the cache is reset.
const DOMAIN_CACHE_LIMIT: usize = 1024;

pub struct UrlMatcher {
    rules: Vec<(&'static Service, Regex)>,
    domains: Mutex<HashMap<String, Regex>>,
}

impl UrlMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        let rules = SERVICES
            .iter()
            .map(|s| Regex::new(s.pattern).map(|re| (s, re)))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            rules,
            domains: Mutex::new(HashMap::new()),
        })
    }

    /// Every rewritable link in `content`, built-in services first in
    /// declaration order, then the guild's custom domains.
    pub fn rewrites(&self, content: &str, settings: &GuildSettings) -> Vec<Rewrite> {
        let mut out = Vec::new();
        let mut claimed: Vec<Range<usize>> = Vec::new();

        for (svc, re) in &self.rules {
            if !settings.is_enabled(svc.name) {
                continue;
            }
            let endpoint = settings.endpoint(svc.name).unwrap_or(svc.default_endpoint);
            for m in re.find_iter(content) {
                claimed.push(m.range());
                out.push(Rewrite {
                    source: svc.name.to_string(),
                    original: m.as_str().to_string(),
                    rewritten: m.as_str().replacen(svc.base, endpoint, 1),
                });
            }
        }

        for domain in settings.domains.iter().filter(|d| d.enabled) {
            let Some(re) = self.domain_regex(&domain.match_domain) else {
                continue;
            };
            for m in re.find_iter(content) {
                let range = m.range();
                if claimed.iter().any(|c| c.start < range.end && range.start < c.end) {
                    continue;
                }
                claimed.push(range);
                out.push(Rewrite {
                    source: domain.match_domain.clone(),
                    original: m.as_str().to_string(),
                    rewritten: m
                        .as_str()
                        .replacen(&domain.match_domain, &domain.replace_domain, 1),
                });
            }
        }
        out
    }

    fn domain_regex(&self, host: &str) -> Option<Regex> {
        let mut cache = self.domains.lock();
        if let Some(re) = cache.get(host) {
            return Some(re.clone());
        }
        let re = match domain_pattern(host) {
            Ok(re) => re,
            Err(e) => {
                warn!(host, error = %e, "unusable custom domain");
                return None;
            }
        };
        if cache.len() >= DOMAIN_CACHE_LIMIT {
            debug!(entries = cache.len(), "resetting domain pattern cache");
            cache.clear();
        }
        cache.insert(host.to_string(), re.clone());
        Some(re)
    }

    #[cfg(test)]
    fn cached_domains(&self) -> usize {
        self.domains.lock().len()
    }
}

fn domain_pattern(host: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"https?://(?:www\.)?{}/\S*", regex::escape(host)))
}

/// Whether the guild has anything that could produce a rewrite.
pub fn anything_enabled(settings: &GuildSettings) -> bool {
    service_names().any(|s| settings.is_enabled(s)) || settings.domains.iter().any(|d| d.enabled)
}

/// Reduce user input like `https://FxTwitter.com/` to a bare host.
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    without_scheme.trim_end_matches('/').to_string()
}

/// Reply body that makes Discord render each rewritten link as an embed
/// without showing the URL text.
pub fn reply_content(rewrites: &[Rewrite]) -> String {
    rewrites
        .iter()
        .map(|r| format!("[\u{2800}]({})", r.rewritten))
        .collect::<Vec<_>>()
        .join(" ")
}
