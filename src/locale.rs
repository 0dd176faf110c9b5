//! Locale handling
//!
//! Every supported locale maps to a provider domain pair and to one of a small
//! closed set of feed document formats. Locale quirks live here so the feed and
//! manifest parsers can dispatch on them instead of sniffing documents.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while parsing a locale code
#[derive(Debug, Error)]
pub enum LocaleError {
    /// The given locale code is not one of the supported locales
    #[error("Unsupported language: {code}. Supported languages are: en, uk, es, de, se")]
    Unsupported { code: String },
}

/// Supported provider locales
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locale {
    En,
    Uk,
    Es,
    De,
    Se,
}

/// The shape of the episode feed document served for a locale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    /// Media RSS XML with namespaced `content` elements
    Mrss,
    /// Edge player JSON with `feed.items[].group.content`
    EdgeJson,
}

impl Locale {
    /// All supported locales
    pub const ALL: [Locale; 5] = [Locale::En, Locale::Uk, Locale::Es, Locale::De, Locale::Se];

    /// Lowercase locale code as used on the command line
    pub fn code(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Uk => "uk",
            Locale::Es => "es",
            Locale::De => "de",
            Locale::Se => "se",
        }
    }

    /// Feed document format served for this locale
    pub fn feed_format(self) -> FeedFormat {
        match self {
            Locale::Se => FeedFormat::EdgeJson,
            _ => FeedFormat::Mrss,
        }
    }

    /// Query fragment replacing the `device={device}` placeholder in
    /// manifest-generator URLs, selecting the HLS manifest form.
    pub fn device_query(self) -> &'static str {
        match self {
            Locale::De => "acceptMethods=hls",
            _ => "device=Android&deviceOsVersion=4.4.4&acceptMethods=hls",
        }
    }

    /// Whether Spanish `acts/es` parts belong to this locale's episodes
    pub fn keeps_spanish_acts(self) -> bool {
        self == Locale::Es
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = LocaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "uk" => Ok(Locale::Uk),
            "es" => Ok(Locale::Es),
            "de" => Ok(Locale::De),
            "se" => Ok(Locale::Se),
            _ => Err(LocaleError::Unsupported {
                code: s.to_string(),
            }),
        }
    }
}

/// Host names used to build feed URLs for a locale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDomains {
    /// Host serving the feed documents
    pub feed_host: String,
    /// Domain embedded in `mgid:arc:episode:<domain>:<id>` URIs
    pub uri_domain: String,
}

/// Locale to provider domain lookup
///
/// Injected into the resolver so tests (and future provider moves) do not
/// depend on the built-in hosts.
#[derive(Debug, Clone)]
pub struct DomainTable {
    domains: HashMap<Locale, ProviderDomains>,
}

impl DomainTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self {
            domains: HashMap::new(),
        }
    }

    /// Adds or replaces the domains of a locale
    pub fn with(mut self, locale: Locale, feed_host: &str, uri_domain: &str) -> Self {
        self.domains.insert(
            locale,
            ProviderDomains {
                feed_host: feed_host.to_string(),
                uri_domain: uri_domain.to_string(),
            },
        );
        self
    }

    /// Looks up the domains of a locale
    pub fn get(&self, locale: Locale) -> Option<&ProviderDomains> {
        self.domains.get(&locale)
    }
}

impl Default for DomainTable {
    fn default() -> Self {
        Self::new()
            .with(Locale::En, "southpark.cc.com", "southparkstudios.com")
            .with(Locale::Uk, "southpark.cc.com", "southparkstudios.com")
            .with(Locale::Es, "southpark.cc.com", "southparkstudios.com")
            .with(Locale::De, "www.southpark.de", "southpark.de")
            .with(Locale::Se, "southparkstudios.nu", "southparkstudios.nu")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locale() {
        assert_eq!("en".parse::<Locale>().unwrap(), Locale::En);
        assert_eq!(" DE ".parse::<Locale>().unwrap(), Locale::De);
        assert!(matches!(
            "fr".parse::<Locale>(),
            Err(LocaleError::Unsupported { code }) if code == "fr"
        ));
    }

    #[test]
    fn test_feed_format_dispatch() {
        assert_eq!(Locale::Se.feed_format(), FeedFormat::EdgeJson);
        for locale in [Locale::En, Locale::Uk, Locale::Es, Locale::De] {
            assert_eq!(locale.feed_format(), FeedFormat::Mrss);
        }
    }

    #[test]
    fn test_default_table_covers_all_locales() {
        let table = DomainTable::default();
        for locale in Locale::ALL {
            assert!(table.get(locale).is_some(), "missing {}", locale);
        }
        assert_eq!(table.get(Locale::De).unwrap().uri_domain, "southpark.de");
    }
}
