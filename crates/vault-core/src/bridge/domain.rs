//! Domain matching for `list_for_domain` / `get_credentials`, spec §4.G.

fn strip_www(s: &str) -> &str {
    let lower_has_www = s.len() >= 4 && s[..4].eq_ignore_ascii_case("www.");
    if lower_has_www {
        &s[4..]
    } else {
        s
    }
}

/// Pulls the host out of an entry's stored URL. Entries aren't required
/// to hold a valid URL (spec §9: free-text labels are common for
/// non-web entries), so this returns `None` rather than erroring when
/// there's no recognizable `scheme://host` prefix.
fn extract_host(entry_url: &str) -> Option<&str> {
    let after_scheme = entry_url.split_once("://").map(|(_, rest)| rest)?;
    let host_and_port = after_scheme.split(['/', '?', '#']).next().unwrap_or(after_scheme);
    let host = host_and_port.rsplit_once('@').map(|(_, h)| h).unwrap_or(host_and_port);
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// `true` when `entry_url` should be offered for `requested_domain`.
///
/// Both sides are compared with a leading `www.` stripped and
/// case-insensitively. A parsed host matches on exact equality or as a
/// subdomain (`"mail." + requestedDomain`). URLs with no recognizable
/// host fall back to a plain substring match against the stripped
/// request domain.
pub fn domain_matches(entry_url: &str, requested_domain: &str) -> bool {
    let requested = strip_www(requested_domain).to_ascii_lowercase();
    if requested.is_empty() {
        return false;
    }

    match extract_host(entry_url) {
        Some(host) => {
            let host = strip_www(host).to_ascii_lowercase();
            host == requested || host.ends_with(&format!(".{requested}"))
        }
        None => entry_url.to_ascii_lowercase().contains(&requested),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_host_match() {
        assert!(domain_matches("https://github.com/login", "github.com"));
    }

    #[test]
    fn subdomain_matches_parent() {
        assert!(domain_matches("https://mail.google.com", "google.com"));
    }

    #[test]
    fn parent_does_not_match_unrelated_subdomain() {
        assert!(!domain_matches("https://google.com", "evil-google.com"));
    }

    #[test]
    fn www_is_stripped_on_both_sides() {
        assert!(domain_matches("https://www.github.com", "github.com"));
        assert!(domain_matches("https://github.com", "www.github.com"));
    }

    #[test]
    fn non_url_falls_back_to_substring() {
        assert!(domain_matches("My Bank (ask teller)", "ask teller"));
        assert!(!domain_matches("My Bank (ask teller)", "github.com"));
    }

    #[test]
    fn case_insensitive() {
        assert!(domain_matches("https://GitHub.com", "github.COM"));
    }
}
