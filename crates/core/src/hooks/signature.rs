//! Byte-pattern signatures and address resolution
//!
//! A signature is a byte pattern with wildcards plus a signed offset applied
//! to the match. Resolution is strict: a missing or ambiguous signature means
//! the hook point cannot be trusted and is reported as an error.

use super::error::HookError;
use super::module::ModuleImage;

/// Maximum number of matches collected for diagnostics
const MAX_REPORTED_MATCHES: usize = 8;

/// Byte pattern with wildcards and an offset from the match to the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pattern: Vec<Option<u8>>,
    offset: isize,
    allow_ambiguous: bool,
}

impl Signature {
    /// Parse a pattern string
    ///
    /// Supports:
    /// - Hex bytes: "55 48 89 E5"
    /// - Wildcards: "55 ? 89 E5" or "55 ?? 89 E5"
    pub fn parse(pattern: &str) -> Result<Self, HookError> {
        let mut bytes = Vec::new();

        for part in pattern.split_whitespace() {
            if part == "?" || part == "??" {
                bytes.push(None);
            } else {
                let byte = u8::from_str_radix(part, 16).map_err(|_| {
                    HookError::InvalidSignature(format!("Invalid hex byte: {}", part))
                })?;
                bytes.push(Some(byte));
            }
        }

        if bytes.iter().all(Option::is_none) {
            return Err(HookError::InvalidSignature(format!(
                "Pattern has no concrete bytes: '{}'",
                pattern
            )));
        }

        Ok(Self {
            pattern: bytes,
            offset: 0,
            allow_ambiguous: false,
        })
    }

    /// Offset added to the match address
    pub fn with_offset(mut self, offset: isize) -> Self {
        self.offset = offset;
        self
    }

    /// Accept the first of several matches instead of failing
    pub fn allow_ambiguous(mut self, allow: bool) -> Self {
        self.allow_ambiguous = allow;
        self
    }

    pub fn pattern(&self) -> &[Option<u8>] {
        &self.pattern
    }

    pub fn offset(&self) -> isize {
        self.offset
    }

    pub fn accepts_ambiguity(&self) -> bool {
        self.allow_ambiguous
    }

    /// Positions in `haystack` where the pattern matches, at most `limit`
    pub fn find_all(&self, haystack: &[u8], limit: usize) -> Vec<usize> {
        let mut found = Vec::new();
        if haystack.len() < self.pattern.len() || limit == 0 {
            return found;
        }

        // Anchor on the first concrete byte to skip most positions cheaply
        let (anchor_index, anchor) = self
            .pattern
            .iter()
            .enumerate()
            .find_map(|(i, b)| b.map(|b| (i, b)))
            .unwrap_or((0, 0));

        let last_start = haystack.len() - self.pattern.len();
        let mut start = 0;
        while start <= last_start {
            if haystack[start + anchor_index] == anchor && self.matches_at(haystack, start) {
                found.push(start);
                if found.len() >= limit {
                    break;
                }
            }
            start += 1;
        }

        found
    }

    fn matches_at(&self, haystack: &[u8], start: usize) -> bool {
        self.pattern
            .iter()
            .zip(&haystack[start..])
            .all(|(expected, actual)| expected.map_or(true, |b| b == *actual))
    }

    /// Absolute addresses of matches in the executable ranges of `image`
    pub fn scan(&self, image: &ModuleImage, limit: usize) -> Vec<usize> {
        let mut found = Vec::new();
        for range in image.ranges() {
            let remaining = limit - found.len();
            if remaining == 0 {
                break;
            }
            found.extend(
                self.find_all(image.range_bytes(range), remaining)
                    .into_iter()
                    .map(|offset| range.start + offset),
            );
        }
        found
    }
}

/// Resolve a named target in `image`
///
/// Returns `first_match + offset`. Fails when the pattern is absent, or when it
/// matches more than once and the signature does not accept ambiguity.
pub fn resolve(name: &str, signature: &Signature, image: &ModuleImage) -> Result<usize, HookError> {
    let matches = signature.scan(image, MAX_REPORTED_MATCHES);

    let first = match matches.first() {
        Some(&first) => first,
        None => {
            tracing::error!("Failed to find signature '{}' in {}", name, image.file_name());
            return Err(HookError::SignatureNotFound(name.to_string()));
        }
    };

    if matches.len() > 1 {
        for address in &matches {
            tracing::warn!(
                "Signature '{}' matched at {:x} ({}+{:x})",
                name,
                address,
                image.file_name(),
                address - image.base()
            );
        }
        if !signature.accepts_ambiguity() {
            tracing::error!(
                "Signature '{}' is ambiguous ({}{} matches)",
                name,
                matches.len(),
                if matches.len() >= MAX_REPORTED_MATCHES { "+" } else { "" }
            );
            return Err(HookError::AmbiguousSignature {
                name: name.to_string(),
                matches,
            });
        }
    }

    let address = first
        .checked_add_signed(signature.offset())
        .ok_or(HookError::InvalidAddress(first))?;

    tracing::info!(
        "Resolved '{}' at {:x} ({}+{:x})",
        name,
        address,
        image.file_name(),
        address.wrapping_sub(image.base())
    );

    Ok(address)
}
