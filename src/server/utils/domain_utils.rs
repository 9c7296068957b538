use url::Url;

/// lowercased host without a leading `www.`, ports never end up in here because the host is
/// taken from the parsed url. the raw string is parsed as is, decoding it first would read the
/// label from a different host than the one a request goes to
fn normalized_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);

    if host.is_empty() { None } else { Some(host) }
}

/// base domain label, "example" for `https://www.example.com/path`
pub fn base_domain(url: &str) -> Option<String> {
    normalized_host(url).and_then(|h| h.split('.').next().map(str::to_string))
}

/// top level domain, "com" for `https://www.example.com/path`. single label hosts have none
pub fn top_level_domain(url: &str) -> Option<String> {
    let host = normalized_host(url)?;
    let mut labels = host.rsplit('.');
    let last = labels.next()?;
    labels.next()?;
    Some(last.to_string())
}

/// swaps the tld of `url`'s host for `suffix`, keeping scheme, subdomain, port and path
pub fn with_suffix(url: &str, suffix: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    let (stem, _) = host.rsplit_once('.')?;
    let new_host = format!("{}.{}", stem, suffix.trim_start_matches('.'));
    parsed.set_host(Some(&new_host)).ok()?;

    let rebuilt = parsed.to_string();
    // Url always puts a slash after a bare host, the declared urls don't have one
    if !url.ends_with('/') && parsed.path() == "/" && parsed.query().is_none() {
        Some(rebuilt.trim_end_matches('/').to_string())
    } else {
        Some(rebuilt)
    }
}

/// the token the site is searched for with, the last path piece of the declared url
/// (`guardaserie.to` for `https://guardaserie.to`)
pub fn search_token(base_url: &str) -> &str {
    base_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(base_url)
}

/// the path segment right before the trailing slash, `abc` for `https://host/l/abc/`
pub fn trailing_segment(url: &str) -> Option<&str> {
    url.rsplit('/').nth(1).filter(|s| !s.is_empty())
}

/// moves `content_url` onto `base_url`'s tld when both carry the same base label, anything
/// else is handed back untouched
pub fn align_to_base(content_url: &str, base_url: &str) -> String {
    let same_site = base_domain(content_url).is_some() && base_domain(content_url) == base_domain(base_url);
    let target_tld = top_level_domain(base_url);

    match (same_site, target_tld) {
        (true, Some(tld)) if top_level_domain(content_url).as_deref() != Some(tld.as_str()) => {
            with_suffix(content_url, &tld).unwrap_or_else(|| content_url.to_string())
        }
        _ => content_url.to_string(),
    }
}
