//! `spotify://` URI handling.
//!
//! The element accepts URIs of the form `spotify://<link>`, where `<link>` is the
//! client's own link string (for example `spotify:track:<id>`).

/// The single protocol this element handles.
pub const PROTOCOL: &str = "spotify";

/// Default URI used when none is configured.
pub const DEFAULT_URI: &str = "spotify://spotify:track:27jdUE1EYDSXZqhjuNxLem";

/// Reasons a URI is refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("invalid URI '{0}'")]
    Invalid(String),
    #[error("unsupported protocol '{0}'")]
    WrongProtocol(String),
    #[error("URI '{0}' has no location")]
    NoLocation(String),
    #[error("URI can only be changed while the element is stopped")]
    WrongState,
}

/// Parsed `spotify://` URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpotifyUri {
    uri: String,
    location: String,
}

impl SpotifyUri {
    /// Validate `uri` and extract its location.
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let protocol = protocol_of(uri).ok_or_else(|| UriError::Invalid(uri.to_string()))?;
        if !protocol.eq_ignore_ascii_case(PROTOCOL) {
            return Err(UriError::WrongProtocol(protocol.to_string()));
        }
        let location = location_of(uri).ok_or_else(|| UriError::NoLocation(uri.to_string()))?;
        Ok(Self {
            uri: uri.to_string(),
            location,
        })
    }

    /// The full URI as given.
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Link string passed to the client, percent-decoded.
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl Default for SpotifyUri {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            location: DEFAULT_URI[PROTOCOL.len() + 3..].to_string(),
        }
    }
}

impl std::fmt::Display for SpotifyUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri)
    }
}

impl std::str::FromStr for SpotifyUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Protocols handled by the element.
pub fn protocols() -> &'static [&'static str] {
    &[PROTOCOL]
}

/// Scheme of `uri` if it is a syntactically valid `scheme://...` URI.
///
/// A scheme starts with a letter and continues with letters, digits, `+`, `-` or `.`.
fn protocol_of(uri: &str) -> Option<&str> {
    let (scheme, _rest) = uri.split_once("://")?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    chars
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        .then_some(scheme)
}

/// Percent-decoded text after `://`, or `None` when empty.
fn location_of(uri: &str) -> Option<String> {
    let (_, rest) = uri.split_once("://")?;
    let decoded = urlencoding::decode(rest).ok()?;
    if decoded.is_empty() {
        None
    } else {
        Some(decoded.into_owned())
    }
}
