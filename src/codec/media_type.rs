//! Media type ranges and Accept header parsing

use mime::Mime;
use std::fmt;

/// A media range from an Accept header or a codec registration
///
/// Wraps a parsed MIME type; parameters are ignored for matching, which is
/// driven purely by type/subtype with `*` wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRange(Mime);

impl MediaRange {
    /// Parse a media range, returning None for unparseable input
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse::<Mime>().ok().map(Self)
    }

    /// The full wildcard `*/*`
    pub fn any() -> Self {
        Self(mime::STAR_STAR)
    }

    /// type/subtype without parameters
    pub fn essence(&self) -> &str {
        self.0.essence_str()
    }

    /// True for `*/*`
    pub fn is_any(&self) -> bool {
        self.0.type_() == mime::STAR && self.0.subtype() == mime::STAR
    }

    /// Whether this range covers a concrete media type
    pub fn matches(&self, concrete: &MediaRange) -> bool {
        if self.0.type_() == mime::STAR {
            return true;
        }
        if self.0.type_() != concrete.0.type_() {
            return false;
        }
        self.0.subtype() == mime::STAR || self.0.subtype() == concrete.0.subtype()
    }

    /// Match specificity: exact type/subtype > `type/*` > `*/*`
    pub fn specificity(&self) -> u8 {
        if self.0.type_() == mime::STAR {
            0
        } else if self.0.subtype() == mime::STAR {
            1
        } else {
            2
        }
    }
}

impl fmt::Display for MediaRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.essence())
    }
}

/// Parse an Accept header into ranges, preserving header order
///
/// An absent or empty header yields an empty list, which negotiation treats
/// as "accept anything". `application/octet-stream` in an Accept header also
/// means "send anything" and is normalized to `*/*`. Unparseable entries are
/// skipped.
pub fn parse_accept(header: Option<&str>) -> Vec<MediaRange> {
    header
        .map(|h| {
            h.split(',')
                .filter_map(MediaRange::parse)
                .map(|r| {
                    if r.essence() == mime::APPLICATION_OCTET_STREAM.essence_str() {
                        MediaRange::any()
                    } else {
                        r
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}
