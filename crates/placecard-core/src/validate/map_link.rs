//! Map link validation

use url::{Host, Url};

use super::{ReasonCode, ValidationError};

/// Parse a map link and check that it points at a mapping service.
pub fn normalize(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed)
        .map_err(|_| ValidationError::new(ReasonCode::MalformedMapLink, trimmed))?;
    if url.scheme() != "https" {
        return Err(ValidationError::new(ReasonCode::MalformedMapLink, trimmed));
    }
    if !is_map_service(&url) {
        return Err(ValidationError::new(
            ReasonCode::UnsupportedMapHost,
            url.host_str().unwrap_or_default(),
        ));
    }
    Ok(url.into())
}

/// Whether `value` is an already-normalized map link.
#[must_use]
pub fn is_canonical(value: &str) -> bool {
    Url::parse(value)
        .is_ok_and(|url| url.as_str() == value && url.scheme() == "https" && is_map_service(&url))
}

fn is_map_service(url: &Url) -> bool {
    let Some(Host::Domain(host)) = url.host() else {
        return false;
    };
    let host = host.strip_prefix("www.").unwrap_or(host);
    let maps_path = url.path() == "/maps" || url.path().starts_with("/maps/");

    match host {
        "maps.app.goo.gl" | "waze.com" | "ul.waze.com" => true,
        "goo.gl" => maps_path,
        _ if host.starts_with("maps.google.") => true,
        _ if host.starts_with("google.") => maps_path,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_mapping_services() {
        for link in [
            "https://maps.app.goo.gl/AbCd123",
            "https://goo.gl/maps/xyz",
            "https://maps.google.com/?q=9.93,-84.08",
            "https://www.google.co.cr/maps/place/Casa",
            "https://waze.com/ul?ll=9.93,-84.08",
            "https://ul.waze.com/ul?place=abc",
        ] {
            let normalized = normalize(link).unwrap();
            assert!(is_canonical(&normalized), "{link}");
        }
    }

    #[test]
    fn test_rejects_other_hosts() {
        for link in [
            "https://example.com/maps",
            "https://goo.gl/other",
            "https://www.google.com/search?q=casa",
        ] {
            assert_eq!(
                normalize(link).unwrap_err().reason,
                ReasonCode::UnsupportedMapHost,
                "{link}"
            );
        }
    }

    #[test]
    fn test_rejects_non_https() {
        assert_eq!(
            normalize("http://maps.app.goo.gl/x").unwrap_err().reason,
            ReasonCode::MalformedMapLink
        );
        assert_eq!(
            normalize("not a link").unwrap_err().reason,
            ReasonCode::MalformedMapLink
        );
    }

    #[test]
    fn test_raw_text_is_not_canonical() {
        assert!(!is_canonical(" https://maps.app.goo.gl/x"));
        assert!(!is_canonical("https://MAPS.app.goo.gl/x"));
    }
}
