//! Content locator parsing.

use url::Url;

use super::{InfoHash, SwarmError};

const BTIH_PREFIX: &str = "urn:btih:";

/// Parsed reference to swarm content.
///
/// Built from a magnet URI or a bare hex info hash.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentLocator {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

impl ContentLocator {
    /// Locator for a known info hash without any hints.
    pub fn from_info_hash(info_hash: InfoHash) -> Self {
        Self {
            info_hash,
            display_name: None,
            trackers: Vec::new(),
        }
    }

    /// Parses a magnet URI or a 40 character hex info hash.
    ///
    /// # Errors
    ///
    /// - `SwarmError::InvalidLocator` - Not a magnet URI, or no usable `xt`
    /// - `SwarmError::InvalidInfoHash` - The btih value is not 40 hex chars
    pub fn parse(input: &str) -> Result<Self, SwarmError> {
        let input = input.trim();
        if input.len() == 40 && input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Self::from_info_hash(InfoHash::from_hex(input)?));
        }

        let url = Url::parse(input).map_err(|e| SwarmError::InvalidLocator {
            reason: format!("not a magnet URI: {e}"),
        })?;
        if url.scheme() != "magnet" {
            return Err(SwarmError::InvalidLocator {
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    if let Some(hash) = value.strip_prefix(BTIH_PREFIX) {
                        info_hash = Some(InfoHash::from_hex(hash)?);
                    }
                }
                "dn" if !value.is_empty() => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or_else(|| SwarmError::InvalidLocator {
            reason: "missing xt=urn:btih parameter".to_string(),
        })?;

        Ok(Self {
            info_hash,
            display_name,
            trackers,
        })
    }

    /// Renders the locator back into a magnet URI.
    pub fn to_magnet(&self) -> String {
        let mut url = format!("magnet:?xt={BTIH_PREFIX}{}", self.info_hash);
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if let Some(name) = &self.display_name {
            query.append_pair("dn", name);
        }
        for tracker in &self.trackers {
            query.append_pair("tr", tracker);
        }
        let extra = query.finish();
        if !extra.is_empty() {
            url.push('&');
            url.push_str(&extra);
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_magnet_link_parsing() {
        let magnet = format!(
            "magnet:?xt=urn:btih:{HASH}&dn=Test%20Torrent&tr=http://tracker.example.com/announce"
        );
        let locator = ContentLocator::parse(&magnet).unwrap();

        assert_eq!(locator.info_hash.to_string(), HASH);
        assert_eq!(locator.display_name.as_deref(), Some("Test Torrent"));
        assert_eq!(
            locator.trackers,
            vec!["http://tracker.example.com/announce".to_string()]
        );
    }

    #[test]
    fn test_bare_info_hash() {
        let locator = ContentLocator::parse(&HASH.to_uppercase()).unwrap();
        assert_eq!(locator.info_hash.to_string(), HASH);
        assert!(locator.display_name.is_none());
    }

    #[test]
    fn test_rejects_invalid_locators() {
        assert!(matches!(
            ContentLocator::parse("http://example.com/file.torrent"),
            Err(SwarmError::InvalidLocator { .. })
        ));
        assert!(matches!(
            ContentLocator::parse("magnet:?dn=nothing"),
            Err(SwarmError::InvalidLocator { .. })
        ));
        assert!(matches!(
            ContentLocator::parse("magnet:?xt=urn:btih:tooshort"),
            Err(SwarmError::InvalidInfoHash { .. })
        ));
        assert!(ContentLocator::parse("").is_err());
    }

    #[test]
    fn test_to_magnet_round_trips() {
        let locator = ContentLocator {
            info_hash: InfoHash::from_hex(HASH).unwrap(),
            display_name: Some("Big Buck Bunny".to_string()),
            trackers: vec!["udp://tracker.example.com:1337".to_string()],
        };
        let reparsed = ContentLocator::parse(&locator.to_magnet()).unwrap();
        assert_eq!(reparsed, locator);
    }
}
