//! Domain names, challenges and TXT payload helpers shared by all stages of a batch.

use std::fmt::Display;

/// The only challenge type this crate can answer
pub const DNS01: &str = "dns-01";
/// Record type used for all challenge records
pub const TXT: &str = "TXT";
/// Default label prepended to a domain for dns-01 challenge records
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

pub type DomainName = String;

/// Return the canonical, fully-qualified form of a domain name:
/// exactly one trailing dot and no empty labels.
///
/// The operation is idempotent, `canonicalize(&canonicalize(d)) == canonicalize(d)`.
pub fn canonicalize(domain: &str) -> DomainName {
    let mut out = String::with_capacity(domain.len() + 1);
    let mut last_dot = false;
    for c in format!("{}.", domain).chars() {
        if c == '.' {
            if last_dot {
                continue;
            }
            last_dot = true;
        } else {
            last_dot = false;
        }
        out.push(c);
    }
    out
}

/// Wrap a TXT payload in double quotes, unless it is quoted already
pub fn quote_txt(content: &str) -> String {
    if is_quoted(content) {
        content.to_owned()
    } else {
        format!("\"{}\"", content)
    }
}

/// Strip the surrounding double quotes from a TXT payload, if present
pub fn unquote_txt(content: &str) -> &str {
    if is_quoted(content) {
        &content[1..content.len() - 1]
    } else {
        content
    }
}

fn is_quoted(content: &str) -> bool {
    content.len() >= 2 && content.starts_with('"') && content.ends_with('"')
}

/// A challenge handed to us by the ACME workflow. Read-only from our point of view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Challenge {
    /// Label to prepend to the domain, usually `_acme-challenge`
    pub record_name: String,
    /// Record type, always [`TXT`] for dns-01
    pub record_type: String,
    /// The value that must become visible in DNS
    pub record_content: String,
}

impl Challenge {
    /// Create a dns-01 challenge for the given record label and content
    pub fn dns01(record_name: &str, record_content: &str) -> Self {
        Challenge {
            record_name: record_name.to_owned(),
            record_type: TXT.to_owned(),
            record_content: record_content.to_owned(),
        }
    }

    /// Full record name for this challenge under a domain.
    /// The domain is canonicalized first.
    pub fn fqdn(&self, domain: &str) -> DomainName {
        canonicalize(&format!("{}.{}", self.record_name, canonicalize(domain)))
    }

    /// The quoted form of [`Challenge::record_content`], as stored in a record set
    pub fn rrdata(&self) -> String {
        quote_txt(&self.record_content)
    }
}

impl Display for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.record_name, self.record_type, self.record_content
        )
    }
}

/// One entry of a respond/cleanup batch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchEntry {
    pub domain: DomainName,
    pub challenge: Challenge,
}

impl BatchEntry {
    pub fn new(domain: &str, challenge: Challenge) -> Self {
        BatchEntry {
            domain: canonicalize(domain),
            challenge,
        }
    }

    /// Fully-qualified name of the record this entry manages
    pub fn record_name(&self) -> DomainName {
        self.challenge.fqdn(&self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_canonicalize_domains() {
        assert_eq!(canonicalize("example.com"), "example.com.");
        assert_eq!(canonicalize("example.com."), "example.com.");
        assert_eq!(canonicalize("example..com..."), "example.com.");
        assert_eq!(canonicalize(""), ".");
    }

    #[test]
    fn canonicalize_should_be_idempotent() {
        for d in [
            "example.com",
            "foo.example.com.",
            "a..b...c",
            "...",
            "",
            "_acme-challenge.x.example.com..",
        ] {
            let once = canonicalize(d);
            assert_eq!(canonicalize(&once), once, "input: {:?}", d);
        }
    }

    #[test]
    fn should_quote_and_unquote() {
        assert_eq!(quote_txt("abc"), "\"abc\"");
        assert_eq!(quote_txt("\"abc\""), "\"abc\"");
        assert_eq!(unquote_txt("\"abc\""), "abc");
        assert_eq!(unquote_txt("abc"), "abc");
        assert_eq!(unquote_txt("\""), "\"");
    }

    #[test]
    fn should_build_challenge_fqdn() {
        let c = Challenge::dns01(ACME_CHALLENGE_RECORD, "abc");
        assert_eq!(c.fqdn("foo.example.com"), "_acme-challenge.foo.example.com.");
        assert_eq!(c.fqdn("foo.example.com."), "_acme-challenge.foo.example.com.");
        assert_eq!(c.rrdata(), "\"abc\"");
        assert_eq!(c.record_type, TXT);
    }

    #[test]
    fn batch_entry_should_canonicalize_domain() {
        let e = BatchEntry::new("foo.example.com", Challenge::dns01("_acme-challenge", "x"));
        assert_eq!(e.domain, "foo.example.com.");
        assert_eq!(e.record_name(), "_acme-challenge.foo.example.com.");
    }
}
