//! Location strings used to open drivers and sources.
//!
//! A location is `scheme://details?key=value&...`. The details are opaque to
//! the engine; each adapter interprets them. Query keys starting with `x-`
//! configure the adapter itself and are stripped before the remainder is
//! handed to a vendor library.

use crate::error::Error;

/// Prefix of query options consumed by adapters rather than vendor libraries.
pub const CUSTOM_OPTION_PREFIX: &str = "x-";

/// A parsed location string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    raw: String,
    scheme: String,
    details: String,
    options: Vec<(String, String)>,
}

impl Location {
    /// Parse a location string.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidLocation {
            location: raw.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| invalid("missing '://' after scheme"))?;

        let scheme_ok = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !scheme_ok {
            return Err(invalid("scheme must be alphanumeric"));
        }

        let (details, query) = match rest.split_once('?') {
            Some((details, query)) => (details, Some(query)),
            None => (rest, None),
        };

        let mut options = Vec::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key.is_empty() {
                return Err(invalid("empty option name"));
            }
            options.push((key.to_string(), value.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            details: details.to_string(),
            options,
        })
    }

    /// The original string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Technology identifier, lowercased.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything between `://` and `?`.
    pub fn details(&self) -> &str {
        &self.details
    }

    /// Split the details into a host part and a path part at the first `/`.
    pub fn host_and_path(&self) -> (&str, &str) {
        match self.details.split_once('/') {
            Some((host, path)) => (host, path),
            None => (&self.details, ""),
        }
    }

    /// Value of the first option named `key`.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parse an option value, failing with [`Error::InvalidLocation`] if it does not parse.
    pub fn parsed_option<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.option(key) {
            Some(value) => value.parse().map(Some).map_err(|_| Error::InvalidLocation {
                location: self.raw.clone(),
                reason: format!("option {key} has invalid value {value:?}"),
            }),
            None => Ok(None),
        }
    }

    /// The location with every `x-` option removed.
    pub fn without_custom_options(&self) -> String {
        let kept: Vec<String> = self
            .options
            .iter()
            .filter(|(k, _)| !k.starts_with(CUSTOM_OPTION_PREFIX))
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        if kept.is_empty() {
            format!("{}://{}", self.scheme, self.details)
        } else {
            format!("{}://{}?{}", self.scheme, self.details, kept.join("&"))
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_options() {
        let loc = Location::parse("sqlite://data/app.db?x-migrations-table=schema_v&cache=shared")
            .unwrap();
        assert_eq!(loc.scheme(), "sqlite");
        assert_eq!(loc.details(), "data/app.db");
        assert_eq!(loc.option("x-migrations-table"), Some("schema_v"));
        assert_eq!(loc.option("cache"), Some("shared"));
        assert_eq!(loc.option("missing"), None);
        assert_eq!(loc.without_custom_options(), "sqlite://data/app.db?cache=shared");
    }

    #[test]
    fn test_host_and_path() {
        let loc = Location::parse("s3://my-bucket/releases/migrations").unwrap();
        assert_eq!(loc.host_and_path(), ("my-bucket", "releases/migrations"));

        let loc = Location::parse("s3://bucket-only").unwrap();
        assert_eq!(loc.host_and_path(), ("bucket-only", ""));
    }

    #[test]
    fn test_absolute_file_path() {
        let loc = Location::parse("file:///var/lib/migrations").unwrap();
        assert_eq!(loc.scheme(), "file");
        assert_eq!(loc.details(), "/var/lib/migrations");
        assert_eq!(loc.without_custom_options(), "file:///var/lib/migrations");
    }

    #[test]
    fn test_parsed_option() {
        let loc = Location::parse("sqlite://x.db?x-busy-timeout-ms=250&x-bad=abc").unwrap();
        assert_eq!(loc.parsed_option::<u64>("x-busy-timeout-ms").unwrap(), Some(250));
        assert_eq!(loc.parsed_option::<u64>("x-none").unwrap(), None);
        assert!(loc.parsed_option::<u64>("x-bad").is_err());
    }

    #[test]
    fn test_invalid_locations() {
        for raw in ["no-scheme", "://details", "1abc://x", "sq lite://x", "db://x?=v"] {
            assert!(
                matches!(Location::parse(raw), Err(Error::InvalidLocation { .. })),
                "expected {raw:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let loc = Location::parse("SQLite://x.db").unwrap();
        assert_eq!(loc.scheme(), "sqlite");
    }
}
