//! Core record model for fringe listings: performances, shows, venues.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ticket availability for a single performance.
///
/// The source site emits a closed set of status strings; anything outside
/// that set is carried through verbatim as `Unknown` so a merge never
/// destroys information it does not understand.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Availability {
    TicketsAvailable,
    SoldOut,
    Cancelled,
    TwoForOne,
    Preview,
    Free,
    FreeTicketed,
    NoAllocation,
    NoAllocationRemaining,
    Unknown(String),
}

impl Availability {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TICKETS_AVAILABLE" => Self::TicketsAvailable,
            "SOLD_OUT" => Self::SoldOut,
            "CANCELLED" => Self::Cancelled,
            "TWO_FOR_ONE" => Self::TwoForOne,
            "PREVIEW" | "PREVIEW_SHOW" => Self::Preview,
            "FREE" => Self::Free,
            "FREE_TICKETED" => Self::FreeTicketed,
            "NO_ALLOCATION" => Self::NoAllocation,
            "NO_ALLOCATION_REMAINING" => Self::NoAllocationRemaining,
            _ => Self::Unknown(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::TicketsAvailable => "TICKETS_AVAILABLE",
            Self::SoldOut => "SOLD_OUT",
            Self::Cancelled => "CANCELLED",
            Self::TwoForOne => "TWO_FOR_ONE",
            Self::Preview => "PREVIEW",
            Self::Free => "FREE",
            Self::FreeTicketed => "FREE_TICKETED",
            Self::NoAllocation => "NO_ALLOCATION",
            Self::NoAllocationRemaining => "NO_ALLOCATION_REMAINING",
            Self::Unknown(raw) => raw,
        }
    }

    /// States that read as "you cannot buy a ticket right now" without
    /// being an outright cancellation.
    pub fn is_sold_out_like(&self) -> bool {
        matches!(
            self,
            Self::SoldOut | Self::NoAllocation | Self::NoAllocationRemaining
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }

    /// Informativeness ladder used to break ties when one scraped batch
    /// carries the same performance key twice with different statuses.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Cancelled => 100,
            Self::SoldOut => 90,
            Self::NoAllocation | Self::NoAllocationRemaining => 85,
            Self::Preview => 70,
            Self::TwoForOne => 60,
            Self::Free | Self::FreeTicketed => 50,
            Self::TicketsAvailable => 10,
            Self::Unknown(_) => 0,
        }
    }
}

impl Default for Availability {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Availability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Availability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Composite identity key for one scheduled performance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PerfKey {
    pub show_url: String,
    pub date: String,
    pub time: String,
}

impl fmt::Display for PerfKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.show_url, self.date, self.time)
    }
}

/// One scheduled occurrence of a show. Column names are a stable external
/// contract inherited from the scraped exports; do not rename them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Performance {
    #[serde(rename = "show-link-href", default)]
    pub show_url: String,
    #[serde(rename = "show-name", default)]
    pub show_name: String,
    #[serde(rename = "show-performer", default)]
    pub performer: String,
    #[serde(rename = "date", default)]
    pub date: String,
    #[serde(rename = "performance-time", default)]
    pub time: String,
    #[serde(rename = "show-availability", default)]
    pub availability: Availability,
    #[serde(rename = "show-location", default)]
    pub venue: String,
    #[serde(rename = "genre", default)]
    pub genre: Option<String>,
    #[serde(rename = "web-scraper-scrape-time", default)]
    pub scraped_at: Option<String>,
}

impl Performance {
    pub fn key(&self) -> PerfKey {
        PerfKey {
            show_url: self.show_url.clone(),
            date: self.date.clone(),
            time: self.time.clone(),
        }
    }

    /// A record without a show URL and date cannot be keyed and is dropped
    /// by merges and loads. An empty time slot is tolerated; it still forms
    /// part of the key.
    pub fn has_valid_key(&self) -> bool {
        !self.show_url.trim().is_empty() && !self.date.trim().is_empty()
    }
}

/// Show metadata scraped from a show detail page, keyed by show URL.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShowInfo {
    #[serde(rename = "show-link-href", default)]
    pub show_url: String,
    #[serde(rename = "show-name", default)]
    pub show_name: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub subgenres: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub warnings: String,
    #[serde(default)]
    pub age_suitability: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub facebook: String,
    #[serde(default)]
    pub instagram: String,
    #[serde(default)]
    pub tiktok: String,
    #[serde(default)]
    pub youtube: String,
    #[serde(default)]
    pub twitter: String,
    #[serde(default)]
    pub bluesky: String,
    #[serde(default)]
    pub mastodon: String,
}

impl ShowInfo {
    pub fn has_valid_key(&self) -> bool {
        !self.show_url.trim().is_empty()
    }
}

/// A physical location hosting performances, cached by its stable code.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Venue {
    #[serde(default)]
    pub venue_code: String,
    #[serde(default)]
    pub venue_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub postcode: String,
    #[serde(default)]
    pub geolocation: String,
    #[serde(default)]
    pub google_maps_url: String,
    #[serde(default)]
    pub venue_page_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub contact_phone: String,
    #[serde(default)]
    pub contact_email: String,
}

impl Venue {
    pub fn has_valid_key(&self) -> bool {
        !self.venue_code.trim().is_empty()
    }
}

/// The persistent "current state" tables, mutated only through merges.
///
/// Keyed maps are ordered so persisted output and merge results are
/// deterministic regardless of batch ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub performances: BTreeMap<PerfKey, Performance>,
    pub shows: BTreeMap<String, ShowInfo>,
    pub venues: BTreeMap<String, Venue>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.performances.is_empty() && self.shows.is_empty() && self.venues.is_empty()
    }
}

/// Handoff contract from the scraping layer: everything one scrape run
/// produced, plus the set of genres that run actually covered.
#[derive(Debug, Clone, Default)]
pub struct ScrapeBatch {
    pub performances: Vec<Performance>,
    pub shows: Vec<ShowInfo>,
    pub venues: Vec<Venue>,
    pub genres: BTreeSet<String>,
}

/// How authoritative an incoming batch is.
///
/// `Recent` batches are partial windows and only ever touch the keys they
/// contain. `Full` batches are the complete truth for the genres they cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeMode {
    Recent,
    Full,
}

/// Parse a display date like `Wednesday 30 July` into a calendar date.
///
/// The site omits the year, so callers supply the festival year. ISO
/// `YYYY-MM-DD` input is accepted as-is; anything unparseable is `None`.
pub fn parse_display_date(raw: &str, default_year: i32) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    let parts: Vec<&str> = raw.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    let day: u32 = parts[1].parse().ok()?;
    let composed = format!("{} {} {}", day, parts[2], default_year);
    NaiveDate::parse_from_str(&composed, "%d %B %Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_maps_known_raw_values() {
        assert_eq!(
            Availability::parse("TICKETS_AVAILABLE"),
            Availability::TicketsAvailable
        );
        assert_eq!(Availability::parse("sold_out"), Availability::SoldOut);
        assert_eq!(Availability::parse("PREVIEW_SHOW"), Availability::Preview);
        assert_eq!(
            Availability::parse("NO_ALLOCATION_REMAINING"),
            Availability::NoAllocationRemaining
        );
    }

    #[test]
    fn availability_preserves_unmapped_values_verbatim() {
        let status = Availability::parse("WAITLIST_ONLY");
        assert!(status.is_unknown());
        assert_eq!(status.as_str(), "WAITLIST_ONLY");
    }

    #[test]
    fn sold_out_like_covers_allocation_states() {
        assert!(Availability::SoldOut.is_sold_out_like());
        assert!(Availability::NoAllocation.is_sold_out_like());
        assert!(Availability::NoAllocationRemaining.is_sold_out_like());
        assert!(!Availability::Cancelled.is_sold_out_like());
        assert!(!Availability::TicketsAvailable.is_sold_out_like());
    }

    #[test]
    fn priority_ladder_prefers_terminal_states() {
        assert!(Availability::Cancelled.priority() > Availability::SoldOut.priority());
        assert!(Availability::SoldOut.priority() > Availability::NoAllocation.priority());
        assert!(
            Availability::TicketsAvailable.priority()
                > Availability::Unknown("?".into()).priority()
        );
    }

    #[test]
    fn perf_key_display_is_pipe_delimited() {
        let perf = Performance {
            show_url: "https://edfringe.com/shows/a".into(),
            date: "Wednesday 05 August".into(),
            time: "19:30 - 20:30".into(),
            ..Default::default()
        };
        assert_eq!(
            perf.key().to_string(),
            "https://edfringe.com/shows/a|Wednesday 05 August|19:30 - 20:30"
        );
    }

    #[test]
    fn key_validation_requires_url_and_date() {
        let mut perf = Performance {
            show_url: "https://edfringe.com/shows/a".into(),
            date: "Wednesday 05 August".into(),
            ..Default::default()
        };
        assert!(perf.has_valid_key());
        perf.date.clear();
        assert!(!perf.has_valid_key());
    }

    #[test]
    fn parses_display_dates_with_default_year() {
        assert_eq!(
            parse_display_date("Wednesday 30 July", 2025),
            NaiveDate::from_ymd_opt(2025, 7, 30)
        );
        assert_eq!(
            parse_display_date("Friday 01 August", 2026),
            NaiveDate::from_ymd_opt(2026, 8, 1)
        );
    }

    #[test]
    fn accepts_iso_dates_unchanged() {
        assert_eq!(
            parse_display_date("2025-08-05", 2026),
            NaiveDate::from_ymd_opt(2025, 8, 5)
        );
    }

    #[test]
    fn rejects_malformed_dates() {
        assert_eq!(parse_display_date("", 2025), None);
        assert_eq!(parse_display_date("Wednesday", 2025), None);
        assert_eq!(parse_display_date("Wednesday 32 July", 2025), None);
        assert_eq!(parse_display_date("not a date at all", 2025), None);
    }
}
