//! URL-shape detection and advisory safety warnings
//!
//! The warning check is informational only. It never blocks a visit; its
//! output is passed through to the classifier as context.

use url::{Host, Url};

/// TLDs disproportionately used by throwaway phishing domains
const SUSPICIOUS_TLDS: &[&str] = &[".tk", ".ml", ".ga", ".cf", ".gq", ".xyz", ".top"];

/// Keywords common in credential-phishing URLs
const SUSPICIOUS_KEYWORDS: &[&str] = &["login", "verify", "account", "secure", "update", "confirm"];

/// URLs longer than this draw a warning
const MAX_UNREMARKABLE_URL_LEN: usize = 200;

/// Whether a decoded payload is a visitable URL
///
/// Only absolute http/https URLs with a host qualify. Scheme-less text,
/// `tel:`/`mailto:` payloads, and plain text never trigger analysis.
pub fn is_url_payload(payload: &str) -> bool {
    match Url::parse(payload.trim()) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https") && url.host().is_some()
        }
        Err(_) => false,
    }
}

/// Advisory warnings for a destination URL
///
/// Purely heuristic and never authoritative: the visit proceeds regardless,
/// and the classifier weighs the warnings alongside page content.
pub fn safety_warnings(raw_url: &str) -> Vec<String> {
    let mut warnings = Vec::new();

    let url = match Url::parse(raw_url.trim()) {
        Ok(url) => url,
        Err(_) => return warnings,
    };

    if let Some(host) = url.host() {
        match host {
            Host::Ipv4(_) | Host::Ipv6(_) => {
                warnings.push("Host is a raw IP address, not a domain name".to_string());
            }
            Host::Domain(domain) => {
                let domain = domain.to_lowercase();
                for tld in SUSPICIOUS_TLDS {
                    if domain.ends_with(tld) {
                        warnings.push(format!(
                            "Domain uses a TLD frequently seen in abuse ({})",
                            tld
                        ));
                        break;
                    }
                }
            }
        }
    }

    let lowered = raw_url.to_lowercase();
    for keyword in SUSPICIOUS_KEYWORDS {
        if lowered.contains(keyword) {
            warnings.push(format!("URL contains suspicious keyword '{}'", keyword));
        }
    }

    if raw_url.len() > MAX_UNREMARKABLE_URL_LEN {
        warnings.push(format!(
            "URL is unusually long ({} characters)",
            raw_url.len()
        ));
    }

    warnings
}
