//! Magnet URI parsing.

use crate::error::DownloaderError;

const BTIH_PREFIX: &str = "urn:btih:";

/// Infohash of a magnet link, lowercased
///
/// Accepts the 40-character hex form and the 32-character base32 (`A-Z2-7`) form.
pub fn extract_hash(magnet: &str) -> Result<String, DownloaderError> {
    let url = parse(magnet)?;

    let hash = url
        .query_pairs()
        .filter(|(key, _)| key == "xt")
        .find_map(|(_, value)| {
            value
                .get(..BTIH_PREFIX.len())
                .filter(|p| p.eq_ignore_ascii_case(BTIH_PREFIX))
                .map(|_| value[BTIH_PREFIX.len()..].to_ascii_lowercase())
        })
        .ok_or_else(|| DownloaderError::InvalidMagnet("missing xt=urn:btih parameter".into()))?;

    let valid = match hash.len() {
        40 => hash.chars().all(|c| c.is_ascii_hexdigit()),
        32 => hash.chars().all(|c| matches!(c, 'a'..='z' | '2'..='7')),
        _ => false,
    };
    if !valid {
        return Err(DownloaderError::InvalidMagnet(format!(
            "malformed infohash: {hash}"
        )));
    }

    Ok(hash)
}

/// Display name (`dn`) of a magnet link, if present
pub fn extract_name(magnet: &str) -> Option<String> {
    let url = parse(magnet).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "dn")
        .map(|(_, value)| value.into_owned())
        .filter(|name| !name.is_empty())
}

/// True for `magnet:` URIs
pub fn is_magnet(link: &str) -> bool {
    link.get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("magnet:"))
}

fn parse(magnet: &str) -> Result<url::Url, DownloaderError> {
    if !is_magnet(magnet) {
        return Err(DownloaderError::InvalidMagnet("not a magnet link".into()));
    }
    url::Url::parse(magnet).map_err(|e| DownloaderError::InvalidMagnet(e.to_string()))
}
