use url::Url;

const HTTP_PREFIX: &str = "http://";

/// Accepts plain-HTTP URLs that point at something more than the site root
/// and name a file, so `http://host/dir/` is refused.
pub fn verify_url(candidate: &str) -> Option<Url> {
    let candidate = candidate.trim();
    if !candidate.to_ascii_lowercase().starts_with(HTTP_PREFIX) {
        return None;
    }
    let parsed = match Url::parse(candidate) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::debug!(url = candidate, error = %err, "url is not valid");
            return None;
        }
    };
    if parsed.scheme() != "http" {
        return None;
    }
    let file_part_len = parsed.path().len() + parsed.query().map(|q| q.len() + 1).unwrap_or(0);
    if file_part_len < 2 {
        return None;
    }
    if file_name_from_url(&parsed).is_empty() {
        tracing::debug!(url = candidate, "url names a directory, not a file");
        return None;
    }
    Some(parsed)
}

/// Last path segment of the URL, still percent-encoded. Empty for a trailing slash.
pub fn file_name_from_url(url: &Url) -> String {
    url.path().rsplit('/').next().unwrap_or("").to_string()
}
