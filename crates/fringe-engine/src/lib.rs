//! Record reconciliation: canonical-table merges, snapshot comparison and
//! tabular conversion.
//!
//! Everything here is pure value -> value; loading and persisting the tables
//! is fringe-store's job, so a run is always load -> transform -> persist.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use fringe_core::{
    parse_display_date, Availability, Dataset, MergeMode, PerfKey, Performance, ScrapeBatch,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

// Any in-season year works for ordering raw display dates against each
// other; a leap year keeps 29 February parseable.
const SORT_YEAR: i32 = 2024;

/// Tally of what one merge run did to the canonical dataset.
#[derive(Debug, Clone, Serialize)]
pub struct MergeStats {
    pub run_id: Uuid,
    pub mode: MergeMode,
    pub performances_inserted: usize,
    pub performances_updated: usize,
    pub performances_discarded: usize,
    pub dropped_invalid: usize,
    pub shows_upserted: usize,
    pub venues_added: usize,
    pub venues_skipped: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub dataset: Dataset,
    pub stats: MergeStats,
}

/// Merge one scraped batch into the canonical dataset.
///
/// Recent mode upserts by key and leaves untouched keys alone; full mode
/// first discards every existing performance whose genre is in
/// `batch.genres`, because a full scrape is authoritative for exactly the
/// genres it covered. Shows always upsert by URL; venues are append-only by
/// code. Records without an identity key are dropped and counted, never
/// fatal.
pub fn merge(canonical: Dataset, batch: ScrapeBatch, mode: MergeMode) -> MergeOutcome {
    let mut dataset = canonical;
    let mut stats = MergeStats {
        run_id: Uuid::new_v4(),
        mode,
        performances_inserted: 0,
        performances_updated: 0,
        performances_discarded: 0,
        dropped_invalid: 0,
        shows_upserted: 0,
        venues_added: 0,
        venues_skipped: 0,
    };

    // Dedup the batch itself: when a scrape emits the same key twice, keep
    // the most informative availability status.
    let mut incoming: BTreeMap<PerfKey, Performance> = BTreeMap::new();
    for perf in batch.performances {
        if !perf.has_valid_key() {
            warn!(key = %perf.key(), "dropping incoming performance with missing identity key");
            stats.dropped_invalid += 1;
            continue;
        }
        let key = perf.key();
        match incoming.get(&key) {
            Some(existing)
                if existing.availability.priority() >= perf.availability.priority() => {}
            _ => {
                incoming.insert(key, perf);
            }
        }
    }

    if mode == MergeMode::Full {
        let before = dataset.performances.len();
        dataset.performances.retain(|_, perf| match &perf.genre {
            Some(genre) => !batch.genres.contains(genre),
            // Rows with no genre recorded cannot be claimed by any scrape.
            None => true,
        });
        stats.performances_discarded = before - dataset.performances.len();
    }

    for (key, perf) in incoming {
        if dataset.performances.insert(key, perf).is_some() {
            stats.performances_updated += 1;
        } else {
            stats.performances_inserted += 1;
        }
    }

    for show in batch.shows {
        if !show.has_valid_key() {
            warn!("dropping incoming show with missing show URL");
            stats.dropped_invalid += 1;
            continue;
        }
        dataset.shows.insert(show.show_url.clone(), show);
        stats.shows_upserted += 1;
    }

    for venue in batch.venues {
        if !venue.has_valid_key() {
            warn!("dropping incoming venue with missing venue code");
            stats.dropped_invalid += 1;
            continue;
        }
        // Write-once cache: a known code is never overwritten, so detail
        // fields fetched once (phone, email) survive later merges.
        if dataset.venues.contains_key(&venue.venue_code) {
            stats.venues_skipped += 1;
        } else {
            dataset.venues.insert(venue.venue_code.clone(), venue);
            stats.venues_added += 1;
        }
    }

    info!(
        run_id = %stats.run_id,
        inserted = stats.performances_inserted,
        updated = stats.performances_updated,
        discarded = stats.performances_discarded,
        dropped = stats.dropped_invalid,
        venues_added = stats.venues_added,
        "merge complete"
    );
    MergeOutcome { dataset, stats }
}

/// Which of `codes` the scraping layer still needs to fetch detail pages
/// for. Known codes are cached for good, so their fetches are skipped.
pub fn venue_codes_needing_fetch<'a>(
    dataset: &Dataset,
    codes: impl IntoIterator<Item = &'a str>,
) -> BTreeSet<String> {
    codes
        .into_iter()
        .filter(|code| !code.trim().is_empty() && !dataset.venues.contains_key(*code))
        .map(|code| code.to_string())
        .collect()
}

/// Minimal show identity derivable from performance rows alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShowRef {
    pub show_url: String,
    pub show_name: String,
    pub performer: String,
}

/// An immutable, date-labelled capture of performance and show state.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub label: String,
    pub shows: BTreeMap<String, ShowRef>,
    pub performances: BTreeMap<PerfKey, Performance>,
}

impl Snapshot {
    /// Build a snapshot from flat performance rows (the shape snapshot CSV
    /// files carry). Show identity is derived from the rows; the first row
    /// seen for a URL supplies name and performer.
    pub fn from_performances(label: impl Into<String>, rows: Vec<Performance>) -> Self {
        let mut shows = BTreeMap::new();
        let mut performances = BTreeMap::new();
        for perf in rows {
            if !perf.has_valid_key() {
                continue;
            }
            shows
                .entry(perf.show_url.clone())
                .or_insert_with(|| ShowRef {
                    show_url: perf.show_url.clone(),
                    show_name: perf.show_name.clone(),
                    performer: perf.performer.clone(),
                });
            performances.insert(perf.key(), perf);
        }
        Self {
            label: label.into(),
            shows,
            performances,
        }
    }

    pub fn from_dataset(label: impl Into<String>, dataset: &Dataset) -> Self {
        Self::from_performances(label, dataset.performances.values().cloned().collect())
    }

    /// Scrape timestamp of the first row that carries one, formatted
    /// `YYYY-MM-DD HH:MM`. `None` when no row has a parseable timestamp.
    pub fn label_from_rows(rows: &[Performance]) -> Option<String> {
        rows.iter()
            .filter_map(|perf| perf.scraped_at.as_deref())
            .find_map(parse_scrape_time)
            .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
    }
}

fn parse_scrape_time(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

/// A show-level entry in a change report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShowChange {
    pub show_name: String,
    pub show_url: String,
    pub performer: String,
    pub performance_count: usize,
    pub venues: Vec<String>,
    pub date_range: String,
}

/// A performance-level entry in a change report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceChange {
    pub show_name: String,
    pub show_url: String,
    pub performer: String,
    pub venue: String,
    pub date: String,
    pub time: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Classified differences between two snapshots, in report order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSet {
    pub previous_label: String,
    pub current_label: String,
    pub new_shows: Vec<ShowChange>,
    pub sold_out: Vec<PerformanceChange>,
    pub cancelled: Vec<PerformanceChange>,
    pub back_available: Vec<PerformanceChange>,
    pub new_performances: Vec<PerformanceChange>,
    pub removed_shows: Vec<ShowChange>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    pub fn total_changes(&self) -> usize {
        self.new_shows.len()
            + self.sold_out.len()
            + self.cancelled.len()
            + self.back_available.len()
            + self.new_performances.len()
            + self.removed_shows.len()
    }
}

/// Compare two snapshots read-only and classify every difference.
///
/// A key appears in at most one of sold_out / cancelled / back_available:
/// cancelled wins over sold_out, which wins over back_available. A key whose
/// availability is outside the known set on either side has its transition
/// suppressed rather than guessed, but still counts for show-level and
/// new-performance classification. New shows keep all their performances out
/// of `new_performances` so nothing is double-reported.
pub fn compare(previous: &Snapshot, current: &Snapshot) -> ChangeSet {
    let mut diff = ChangeSet {
        previous_label: previous.label.clone(),
        current_label: current.label.clone(),
        ..Default::default()
    };

    let added_shows: BTreeSet<&str> = current
        .shows
        .keys()
        .filter(|url| !previous.shows.contains_key(*url))
        .map(String::as_str)
        .collect();

    for url in &added_shows {
        let show = &current.shows[*url];
        let rows: Vec<&Performance> = current
            .performances
            .values()
            .filter(|perf| perf.show_url == *url)
            .collect();
        diff.new_shows.push(ShowChange {
            show_name: show.show_name.clone(),
            show_url: show.show_url.clone(),
            performer: show.performer.clone(),
            performance_count: rows.len(),
            venues: collect_venues(&rows, 3),
            date_range: date_range(&rows),
        });
    }

    for (url, show) in &previous.shows {
        if current.shows.contains_key(url) {
            continue;
        }
        let count = previous
            .performances
            .values()
            .filter(|perf| &perf.show_url == url)
            .count();
        diff.removed_shows.push(ShowChange {
            show_name: show.show_name.clone(),
            show_url: show.show_url.clone(),
            performer: show.performer.clone(),
            performance_count: count,
            venues: Vec::new(),
            date_range: String::new(),
        });
    }

    for (key, perf) in &current.performances {
        if previous.performances.contains_key(key) {
            continue;
        }
        // Performances of brand-new shows are implied by the new-show entry.
        if added_shows.contains(perf.show_url.as_str()) {
            continue;
        }
        if !previous.shows.contains_key(&perf.show_url) {
            continue;
        }
        diff.new_performances.push(performance_change(perf, None));
    }

    for (key, old_perf) in &previous.performances {
        let Some(new_perf) = current.performances.get(key) else {
            continue;
        };
        let old = &old_perf.availability;
        let new = &new_perf.availability;
        if old == new {
            continue;
        }
        if old.is_unknown() || new.is_unknown() {
            warn!(
                key = %key,
                old = %old,
                new = %new,
                "unrecognised availability value, suppressing transition"
            );
            continue;
        }

        let change = performance_change(new_perf, Some(old.to_string()));
        if new.is_cancelled() {
            diff.cancelled.push(change);
        } else if new.is_sold_out_like() {
            // Includes reshuffles within the sold-out-like set, e.g.
            // SOLD_OUT -> NO_ALLOCATION; tickets are still unbuyable.
            diff.sold_out.push(change);
        } else if old.is_sold_out_like() || old.is_cancelled() {
            diff.back_available.push(change);
        }
        // Remaining transitions (e.g. TICKETS_AVAILABLE -> TWO_FOR_ONE) are
        // not part of the report contract.
    }

    diff.new_shows.sort_by(show_change_order);
    diff.removed_shows.sort_by(show_change_order);
    for category in [
        &mut diff.sold_out,
        &mut diff.cancelled,
        &mut diff.back_available,
        &mut diff.new_performances,
    ] {
        category.sort_by(performance_change_order);
    }

    debug!(
        new_shows = diff.new_shows.len(),
        sold_out = diff.sold_out.len(),
        cancelled = diff.cancelled.len(),
        back_available = diff.back_available.len(),
        new_performances = diff.new_performances.len(),
        removed_shows = diff.removed_shows.len(),
        "comparison complete"
    );
    diff
}

fn performance_change(perf: &Performance, old_value: Option<String>) -> PerformanceChange {
    PerformanceChange {
        show_name: perf.show_name.clone(),
        show_url: perf.show_url.clone(),
        performer: perf.performer.clone(),
        venue: perf.venue.clone(),
        date: perf.date.clone(),
        time: perf.time.clone(),
        old_value,
        new_value: Some(perf.availability.to_string()),
    }
}

fn collect_venues(rows: &[&Performance], limit: usize) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut venues = Vec::new();
    for perf in rows {
        if perf.venue.is_empty() || !seen.insert(perf.venue.clone()) {
            continue;
        }
        venues.push(perf.venue.clone());
        if venues.len() == limit {
            break;
        }
    }
    venues
}

fn date_range(rows: &[&Performance]) -> String {
    let mut dated: Vec<(NaiveDate, &str)> = rows
        .iter()
        .filter_map(|perf| {
            parse_display_date(&perf.date, SORT_YEAR).map(|date| (date, perf.date.as_str()))
        })
        .collect();
    if dated.is_empty() {
        return String::new();
    }
    dated.sort();
    let first = dated.first().map(|(_, raw)| *raw).unwrap_or_default();
    let last = dated.last().map(|(_, raw)| *raw).unwrap_or_default();
    if first == last {
        first.to_string()
    } else {
        format!("{first} - {last}")
    }
}

fn date_order_key(raw: &str) -> (Option<NaiveDate>, String) {
    (parse_display_date(raw, SORT_YEAR), raw.to_string())
}

fn show_change_order(a: &ShowChange, b: &ShowChange) -> std::cmp::Ordering {
    a.show_name
        .to_lowercase()
        .cmp(&b.show_name.to_lowercase())
        .then_with(|| a.show_url.cmp(&b.show_url))
}

fn performance_change_order(a: &PerformanceChange, b: &PerformanceChange) -> std::cmp::Ordering {
    a.show_name
        .to_lowercase()
        .cmp(&b.show_name.to_lowercase())
        .then_with(|| date_order_key(&a.date).cmp(&date_order_key(&b.date)))
        .then_with(|| a.time.cmp(&b.time))
}

/// Cleaned performance row: normalized date, spreadsheet hyperlink attached.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRow {
    pub hyperlink: String,
    pub show_name: String,
    pub performer: String,
    pub show_url: String,
    pub date: NaiveDate,
    pub time: String,
    pub availability: Availability,
    pub venue: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub show_name: String,
    pub num_performances: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub performer: String,
}

/// Wide-format output: one column per performance date.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub const CLEANED_COLUMNS: [&str; 8] = [
    "show",
    "show-name",
    "show-performer",
    "show-link-href",
    "date_normalized",
    "performance-time",
    "show-availability",
    "show-location",
];

pub const SUMMARY_COLUMNS: [&str; 5] = [
    "show-name",
    "num_performances",
    "first_date",
    "last_date",
    "performer",
];

const WIDE_INDEX_COLUMNS: [&str; 5] = [
    "show-link-href",
    "show-name",
    "show-performer",
    "performance-time",
    "show-location",
];

/// Transforms raw performance rows into spreadsheet-friendly shapes.
#[derive(Debug, Clone, Copy)]
pub struct Converter {
    default_year: i32,
}

impl Converter {
    pub fn new(default_year: i32) -> Self {
        Self { default_year }
    }

    /// Normalize display dates to calendar dates, dropping rows whose date
    /// cannot be parsed, and attach an Excel hyperlink cell per row.
    pub fn clean(&self, rows: &[Performance]) -> Vec<CleanRow> {
        let cleaned: Vec<CleanRow> = rows
            .iter()
            .filter_map(|perf| {
                let date = parse_display_date(&perf.date, self.default_year)?;
                Some(CleanRow {
                    hyperlink: excel_hyperlink(&perf.show_url, &perf.show_name),
                    show_name: perf.show_name.clone(),
                    performer: perf.performer.clone(),
                    show_url: perf.show_url.clone(),
                    date,
                    time: perf.time.clone(),
                    availability: perf.availability.clone(),
                    venue: perf.venue.clone(),
                })
            })
            .collect();
        debug!(input = rows.len(), output = cleaned.len(), "cleaned raw rows");
        cleaned
    }

    /// Per-show rollup: performance count, first/last date, performer.
    pub fn summary(&self, cleaned: &[CleanRow]) -> Vec<SummaryRow> {
        let mut by_show: BTreeMap<&str, SummaryRow> = BTreeMap::new();
        for row in cleaned {
            by_show
                .entry(row.show_name.as_str())
                .and_modify(|summary| {
                    summary.num_performances += 1;
                    summary.first_date = summary.first_date.min(row.date);
                    summary.last_date = summary.last_date.max(row.date);
                })
                .or_insert_with(|| SummaryRow {
                    show_name: row.show_name.clone(),
                    num_performances: 1,
                    first_date: row.date,
                    last_date: row.date,
                    performer: row.performer.clone(),
                });
        }
        by_show.into_values().collect()
    }

    /// One row per (show, time slot, location), one column per date holding
    /// the availability status for that date. First status wins when a show
    /// repeats a date within the same slot.
    pub fn wide(&self, cleaned: &[CleanRow]) -> WideTable {
        type WideKey = (String, String, String, String, String);
        let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
        let mut cells: BTreeMap<WideKey, BTreeMap<NaiveDate, String>> = BTreeMap::new();

        for row in cleaned {
            dates.insert(row.date);
            let key = (
                row.show_url.clone(),
                row.show_name.clone(),
                row.performer.clone(),
                row.time.clone(),
                row.venue.clone(),
            );
            cells
                .entry(key)
                .or_default()
                .entry(row.date)
                .or_insert_with(|| row.availability.to_string());
        }

        let mut header: Vec<String> = WIDE_INDEX_COLUMNS.iter().map(|c| c.to_string()).collect();
        header.extend(dates.iter().map(|d| d.format("%Y-%m-%d").to_string()));

        let rows = cells
            .into_iter()
            .map(|((url, name, performer, time, venue), statuses)| {
                let mut row = vec![url, name, performer, time, venue];
                row.extend(
                    dates
                        .iter()
                        .map(|date| statuses.get(date).cloned().unwrap_or_default()),
                );
                row
            })
            .collect();

        WideTable { header, rows }
    }
}

pub fn cleaned_to_rows(cleaned: &[CleanRow]) -> Vec<Vec<String>> {
    cleaned
        .iter()
        .map(|row| {
            vec![
                row.hyperlink.clone(),
                row.show_name.clone(),
                row.performer.clone(),
                row.show_url.clone(),
                row.date.format("%Y-%m-%d").to_string(),
                row.time.clone(),
                row.availability.to_string(),
                row.venue.clone(),
            ]
        })
        .collect()
}

pub fn summary_to_rows(summaries: &[SummaryRow]) -> Vec<Vec<String>> {
    summaries
        .iter()
        .map(|row| {
            vec![
                row.show_name.clone(),
                row.num_performances.to_string(),
                row.first_date.format("%Y-%m-%d").to_string(),
                row.last_date.format("%Y-%m-%d").to_string(),
                row.performer.clone(),
            ]
        })
        .collect()
}

/// Excel `=HYPERLINK(...)` formula with doubled quotes in the display text.
pub fn excel_hyperlink(url: &str, text: &str) -> String {
    let safe_text = text.replace('"', "\"\"");
    format!("=HYPERLINK(\"{url}\", \"{safe_text}\")")
}
