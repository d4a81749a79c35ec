use crate::errors::ValidationError;
use url::Url;

/// A URL that has passed the pre-network gate. Immutable once built; every
/// downstream signal works from these parsed pieces instead of re-parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedUrl {
    url: String,
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl CheckedUrl {
    /// The full normalized URL string.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Lower-cased host with any explicit port stripped.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port from the input, if one was given.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Registrable root of the host for WHOIS queries, e.g.
    /// "mail.example.co.uk" -> "example.co.uk".
    pub fn root_domain(&self) -> String {
        root_domain(&self.host)
    }
}

/// Add a default scheme when none is present and trim surrounding whitespace.
/// An existing scheme is preserved as-is.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Validate a normalized URL without touching the network. Rejections carry
/// a cause-specific message so the caller can tell "missing scheme" apart
/// from "random characters" and "bad TLD".
pub fn validate(normalized: &str) -> Result<CheckedUrl, ValidationError> {
    if normalized.trim().is_empty() || normalized == "http://" {
        return Err(ValidationError::EmptyInput);
    }

    let parsed = match Url::parse(normalized) {
        Ok(p) => p,
        // The url crate rejects some hosts outright (e.g. a numeric final
        // label is treated as a malformed IPv4 address). Classify those by
        // hand so the caller still gets a cause-specific message.
        Err(_) => return Err(classify_unparsable(normalized)),
    };

    let host = match parsed.host_str() {
        Some(h) if !h.is_empty() => h.to_lowercase(),
        _ => return Err(ValidationError::MissingSchemeOrHost),
    };
    if parsed.scheme().is_empty() {
        return Err(ValidationError::MissingSchemeOrHost);
    }

    // Port is stripped before grammar checks but kept for signal extraction.
    let port = parsed.port();

    if host.len() < 3 {
        return Err(ValidationError::HostTooShort);
    }
    if host.len() > 253 {
        return Err(ValidationError::HostTooLong);
    }

    // IP-literal hosts skip the label grammar; the address-bar group flags
    // them on its own.
    if host.parse::<std::net::IpAddr>().is_err() {
        validate_domain_grammar(&host)?;
    }

    Ok(CheckedUrl {
        url: normalized.to_string(),
        scheme: parsed.scheme().to_string(),
        host,
        port,
    })
}

/// Normalize then validate in one step.
pub fn check(raw: &str) -> Result<CheckedUrl, ValidationError> {
    if raw.trim().is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    validate(&normalize(raw))
}

/// Best-effort diagnosis for inputs the url crate refuses to parse.
fn classify_unparsable(normalized: &str) -> ValidationError {
    let after_scheme = match normalized.split_once("://") {
        Some((_, rest)) => rest,
        None => return ValidationError::MissingSchemeOrHost,
    };
    let mut host = after_scheme;
    for sep in ['/', '?', '#'] {
        if let Some((head, _)) = host.split_once(sep) {
            host = head;
        }
    }
    // Strip an explicit port.
    if let Some((head, port)) = host.rsplit_once(':') {
        if port.chars().all(|c| c.is_ascii_digit()) {
            host = head;
        }
    }
    let host = host.to_lowercase();

    if host.is_empty() {
        ValidationError::MissingSchemeOrHost
    } else if host.len() < 3 {
        ValidationError::HostTooShort
    } else if host.len() > 253 {
        ValidationError::HostTooLong
    } else if let Err(e) = validate_domain_grammar(&host) {
        e
    } else {
        ValidationError::MissingSchemeOrHost
    }
}

/// Domain-label grammar: dot-separated alphanumeric labels with internal
/// hyphens only, final label alphabetic with length >= 2.
fn validate_domain_grammar(host: &str) -> Result<(), ValidationError> {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return Err(ValidationError::MissingTld);
    }

    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return Err(ValidationError::InvalidDomainLabel);
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(ValidationError::InvalidDomainLabel);
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ValidationError::InvalidDomainLabel);
        }
    }

    let tld = labels[labels.len() - 1];
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidTld);
    }

    Ok(())
}

/// Extract the registrable root from a host, accounting for common
/// two-part public suffixes like .co.uk and .com.au.
pub fn root_domain(host: &str) -> String {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() < 2 {
        return host.to_string();
    }

    let two_part_tlds = [
        "co.uk", "com.au", "co.jp", "co.kr", "com.br", "co.za", "com.mx", "co.in", "com.sg",
        "co.nz", "com.ar", "co.il", "org.uk", "net.au", "gov.uk", "ac.uk", "edu.au",
    ];

    let last_two = format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1]);
    if parts.len() >= 3 && two_part_tlds.contains(&last_two.as_str()) {
        format!("{}.{}", parts[parts.len() - 3], last_two)
    } else {
        last_two
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_default_scheme() {
        assert_eq!(normalize("example.com"), "http://example.com");
        assert_eq!(normalize("  example.com  "), "http://example.com");
    }

    #[test]
    fn test_normalize_preserves_scheme() {
        assert_eq!(normalize("https://example.com"), "https://example.com");
        assert_eq!(normalize("http://example.com/a"), "http://example.com/a");
    }

    #[test]
    fn test_validate_accepts_normal_domain() {
        let checked = check("https://www.example.com/login?next=/").unwrap();
        assert_eq!(checked.scheme(), "https");
        assert_eq!(checked.host(), "www.example.com");
        assert_eq!(checked.port(), None);
        assert_eq!(checked.root_domain(), "example.com");
    }

    #[test]
    fn test_validate_keeps_explicit_port() {
        let checked = check("http://example.com:8080/path").unwrap();
        assert_eq!(checked.host(), "example.com");
        assert_eq!(checked.port(), Some(8080));
    }

    #[test]
    fn test_validate_rejects_missing_host() {
        // "notaurl" normalizes to http://notaurl which has no TLD
        assert_eq!(check("notaurl"), Err(ValidationError::MissingTld));
        assert_eq!(check(""), Err(ValidationError::EmptyInput));
        assert_eq!(check("   "), Err(ValidationError::EmptyInput));
    }

    #[test]
    fn test_dotless_host_message_names_the_domain_expectation() {
        // Users typing a bare word get the same guidance as any other
        // nonexistent-URL shape.
        let error = check("notaurl").unwrap_err();
        assert_eq!(
            error.to_string(),
            "This type of URL does not exist. Please enter a valid URL with a proper domain name (e.g., example.com)."
        );
    }

    #[test]
    fn test_validate_rejects_short_host() {
        assert_eq!(check("http://ab"), Err(ValidationError::HostTooShort));
    }

    #[test]
    fn test_validate_rejects_empty_label() {
        assert_eq!(
            check("http://abc..com"),
            Err(ValidationError::InvalidDomainLabel)
        );
    }

    #[test]
    fn test_validate_rejects_bad_tld() {
        assert_eq!(check("http://example.c"), Err(ValidationError::InvalidTld));
        assert_eq!(check("http://example.12"), Err(ValidationError::InvalidTld));
    }

    #[test]
    fn test_validate_rejects_hyphen_edges() {
        assert_eq!(
            check("http://-bad.com"),
            Err(ValidationError::InvalidDomainLabel)
        );
        assert_eq!(
            check("http://bad-.com"),
            Err(ValidationError::InvalidDomainLabel)
        );
    }

    #[test]
    fn test_validate_rejects_overlong_host() {
        let long_host = format!("http://{}.com", "a".repeat(260));
        assert_eq!(check(&long_host), Err(ValidationError::HostTooLong));
    }

    #[test]
    fn test_validate_accepts_ip_literal() {
        let checked = check("http://192.168.1.1/login").unwrap();
        assert_eq!(checked.host(), "192.168.1.1");
    }

    #[test]
    fn test_root_domain_two_part_tld() {
        assert_eq!(root_domain("mail.example.co.uk"), "example.co.uk");
        assert_eq!(root_domain("email.nationalgeographic.com"), "nationalgeographic.com");
        assert_eq!(root_domain("example.com"), "example.com");
    }
}
