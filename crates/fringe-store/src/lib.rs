//! CSV persistence for the canonical tables and date-stamped snapshots.
//!
//! All tabular I/O lives here; the engine crates only see in-memory values.
//! Canonical state is three CSV files read and written as a unit. A missing
//! file is an empty table, never an error.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use fringe_core::{Dataset, Performance, ShowInfo, Venue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const PERFORMANCES_FILE: &str = "performances.csv";
pub const SHOW_INFO_FILE: &str = "show-info.csv";
pub const VENUE_INFO_FILE: &str = "venue-info.csv";

/// Column order for each canonical table. Must match the serde field order
/// of the corresponding record so headers line up with serialized rows.
pub const PERFORMANCE_COLUMNS: [&str; 9] = [
    "show-link-href",
    "show-name",
    "show-performer",
    "date",
    "performance-time",
    "show-availability",
    "show-location",
    "genre",
    "web-scraper-scrape-time",
];

pub const SHOW_INFO_COLUMNS: [&str; 16] = [
    "show-link-href",
    "show-name",
    "genre",
    "subgenres",
    "description",
    "warnings",
    "age_suitability",
    "image_url",
    "website",
    "facebook",
    "instagram",
    "tiktok",
    "youtube",
    "twitter",
    "bluesky",
    "mastodon",
];

pub const VENUE_COLUMNS: [&str; 10] = [
    "venue_code",
    "venue_name",
    "address",
    "postcode",
    "geolocation",
    "google_maps_url",
    "venue_page_url",
    "description",
    "contact_phone",
    "contact_email",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no snapshot files found in {0}")]
    NoSnapshots(PathBuf),
}

/// Rows rejected while loading a canonical directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub dropped_performances: usize,
    pub dropped_shows: usize,
    pub dropped_venues: usize,
}

impl LoadReport {
    pub fn total_dropped(&self) -> usize {
        self.dropped_performances + self.dropped_shows + self.dropped_venues
    }
}

/// Load the three canonical tables from `dir`.
///
/// Rows that fail to deserialize or lack an identity key are dropped with a
/// warning and counted; duplicates within a file resolve to the last row.
pub fn load_dataset(dir: &Path) -> Result<(Dataset, LoadReport)> {
    let mut dataset = Dataset::default();
    let mut report = LoadReport::default();

    let (performances, bad_rows) = read_records::<Performance>(&dir.join(PERFORMANCES_FILE))?;
    report.dropped_performances += bad_rows;
    for perf in performances {
        if !perf.has_valid_key() {
            warn!(key = %perf.key(), "dropping performance row with missing identity key");
            report.dropped_performances += 1;
            continue;
        }
        dataset.performances.insert(perf.key(), perf);
    }

    let (shows, bad_rows) = read_records::<ShowInfo>(&dir.join(SHOW_INFO_FILE))?;
    report.dropped_shows += bad_rows;
    for show in shows {
        if !show.has_valid_key() {
            warn!("dropping show row with missing show URL");
            report.dropped_shows += 1;
            continue;
        }
        dataset.shows.insert(show.show_url.clone(), show);
    }

    let (venues, bad_rows) = read_records::<Venue>(&dir.join(VENUE_INFO_FILE))?;
    report.dropped_venues += bad_rows;
    for venue in venues {
        if !venue.has_valid_key() {
            warn!("dropping venue row with missing venue code");
            report.dropped_venues += 1;
            continue;
        }
        dataset.venues.insert(venue.venue_code.clone(), venue);
    }

    debug!(
        performances = dataset.performances.len(),
        shows = dataset.shows.len(),
        venues = dataset.venues.len(),
        dropped = report.total_dropped(),
        "loaded canonical dataset"
    );
    Ok((dataset, report))
}

/// Persist all three canonical tables to `dir`, each via temp-file + rename
/// so a crashed run never leaves a half-written table behind.
pub fn save_dataset(dataset: &Dataset, dir: &Path) -> Result<()> {
    write_table(
        &dir.join(PERFORMANCES_FILE),
        &PERFORMANCE_COLUMNS,
        dataset.performances.values(),
    )?;
    write_table(
        &dir.join(SHOW_INFO_FILE),
        &SHOW_INFO_COLUMNS,
        dataset.shows.values(),
    )?;
    write_table(
        &dir.join(VENUE_INFO_FILE),
        &VENUE_COLUMNS,
        dataset.venues.values(),
    )?;
    Ok(())
}

/// Load a flat performance CSV (a scraped batch export or a snapshot file).
/// Returns the surviving rows and the count of dropped ones.
pub fn load_performances(path: &Path) -> Result<(Vec<Performance>, usize)> {
    let (rows, mut dropped) = read_records::<Performance>(path)?;
    let rows: Vec<Performance> = rows
        .into_iter()
        .filter(|perf| {
            if perf.has_valid_key() {
                true
            } else {
                warn!(path = %path.display(), "dropping performance row with missing identity key");
                dropped += 1;
                false
            }
        })
        .collect();
    Ok((rows, dropped))
}

pub fn load_show_info(path: &Path) -> Result<(Vec<ShowInfo>, usize)> {
    read_records::<ShowInfo>(path)
}

pub fn load_venues(path: &Path) -> Result<(Vec<Venue>, usize)> {
    read_records::<Venue>(path)
}

pub fn snapshot_file_name(date: NaiveDate) -> String {
    format!("{}-snapshot.csv", date.format("%Y-%m-%d"))
}

/// Write a date-stamped snapshot of the performance table.
pub fn save_snapshot<'a>(
    performances: impl Iterator<Item = &'a Performance>,
    dir: &Path,
    date: NaiveDate,
) -> Result<PathBuf> {
    let path = dir.join(snapshot_file_name(date));
    write_table(&path, &PERFORMANCE_COLUMNS, performances)?;
    Ok(path)
}

/// Most recent `*-snapshot.csv` in `dir`, newest first by file name.
/// `exclude_date` skips snapshots whose name contains that date, so a run
/// can compare against "the latest snapshot that is not today's".
pub fn find_latest_snapshot(dir: &Path, exclude_date: Option<&str>) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut names: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("reading snapshot directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with("-snapshot.csv"))
        .collect();
    names.sort();
    names.reverse();

    for name in names {
        if let Some(exclude) = exclude_date {
            if name.contains(exclude) {
                continue;
            }
        }
        return Ok(Some(dir.join(name)));
    }
    Ok(None)
}

/// Like [`find_latest_snapshot`] but a missing snapshot is an error.
pub fn require_latest_snapshot(dir: &Path, exclude_date: Option<&str>) -> Result<PathBuf> {
    find_latest_snapshot(dir, exclude_date)?
        .ok_or_else(|| StoreError::NoSnapshots(dir.to_path_buf()).into())
}

/// Write free-form rows under a caller-supplied header. Used by the
/// converter outputs, whose columns are not known at compile time.
pub fn write_rows(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(header).context("writing csv header")?;
    for row in rows {
        writer.write_record(row).context("writing csv row")?;
    }
    let bytes = writer
        .into_inner()
        .context("flushing csv writer buffer")?;
    write_bytes_atomic(path, &bytes)
}

fn read_records<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, usize)> {
    if !path.exists() {
        debug!(path = %path.display(), "table file missing, treating as empty");
        return Ok((Vec::new(), 0));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("reading headers of {}", path.display()))?
        .clone();

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in reader.records() {
        match record.and_then(|rec| rec.deserialize(Some(&headers))) {
            Ok(row) => rows.push(row),
            Err(err) => {
                warn!(path = %path.display(), %err, "dropping malformed csv row");
                dropped += 1;
            }
        }
    }
    Ok((rows, dropped))
}

fn write_table<'a, T: Serialize + 'a>(
    path: &Path,
    columns: &[&str],
    rows: impl Iterator<Item = &'a T>,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(columns)
        .with_context(|| format!("writing header for {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("serializing row for {}", path.display()))?;
    }
    let bytes = writer
        .into_inner()
        .with_context(|| format!("flushing rows for {}", path.display()))?;
    write_bytes_atomic(path, &bytes)
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "table.csv".to_string());
    // Single-writer contract: one merge run owns the canonical directory.
    let temp_path = parent.join(format!(".{file_name}.tmp"));

    fs::write(&temp_path, bytes)
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "renaming temp file {} -> {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fringe_core::Availability;
    use tempfile::tempdir;

    fn perf(url: &str, date: &str, time: &str, availability: &str) -> Performance {
        Performance {
            show_url: url.to_string(),
            show_name: "Some Show".to_string(),
            performer: "Some Performer".to_string(),
            date: date.to_string(),
            time: time.to_string(),
            availability: Availability::parse(availability),
            venue: "Venue A".to_string(),
            genre: Some("COMEDY".to_string()),
            scraped_at: None,
        }
    }

    #[test]
    fn dataset_round_trips_through_csv() {
        let dir = tempdir().expect("tempdir");
        let mut dataset = Dataset::default();
        let p = perf("/a", "Mon 1 Aug", "14:00 - 15:00", "TICKETS_AVAILABLE");
        dataset.performances.insert(p.key(), p);
        dataset.shows.insert(
            "/a".to_string(),
            ShowInfo {
                show_url: "/a".to_string(),
                show_name: "Some Show".to_string(),
                description: "A show, described".to_string(),
                instagram: "https://instagram.com/someshow".to_string(),
                ..Default::default()
            },
        );
        dataset.venues.insert(
            "V1".to_string(),
            Venue {
                venue_code: "V1".to_string(),
                venue_name: "Pleasance Courtyard".to_string(),
                postcode: "EH8 9TJ".to_string(),
                geolocation: "55.9469,-3.1813".to_string(),
                contact_phone: "+44 131 556 6550".to_string(),
                ..Default::default()
            },
        );

        save_dataset(&dataset, dir.path()).expect("save");
        let (loaded, report) = load_dataset(dir.path()).expect("load");
        assert_eq!(report.total_dropped(), 0);
        assert_eq!(loaded, dataset);
    }

    #[test]
    fn missing_directory_loads_as_empty_dataset() {
        let dir = tempdir().expect("tempdir");
        let (loaded, report) = load_dataset(&dir.path().join("never-written")).expect("load");
        assert!(loaded.is_empty());
        assert_eq!(report.total_dropped(), 0);
    }

    #[test]
    fn empty_tables_still_get_headers() {
        let dir = tempdir().expect("tempdir");
        save_dataset(&Dataset::default(), dir.path()).expect("save");
        let text =
            fs::read_to_string(dir.path().join(VENUE_INFO_FILE)).expect("venue file exists");
        assert!(text.starts_with("venue_code,venue_name"));
        let (loaded, _) = load_dataset(dir.path()).expect("load");
        assert!(loaded.is_empty());
    }

    #[test]
    fn keyless_rows_are_dropped_and_counted() {
        let dir = tempdir().expect("tempdir");
        let mut dataset = Dataset::default();
        let good = perf("/a", "Mon 1 Aug", "14:00", "TICKETS_AVAILABLE");
        dataset.performances.insert(good.key(), good);
        save_dataset(&dataset, dir.path()).expect("save");

        // Append a row with no show URL or date.
        let path = dir.path().join(PERFORMANCES_FILE);
        let mut text = fs::read_to_string(&path).expect("read");
        text.push_str(",Ghost Show,,,,TICKETS_AVAILABLE,,,\n");
        fs::write(&path, text).expect("write");

        let (loaded, report) = load_dataset(dir.path()).expect("load");
        assert_eq!(loaded.performances.len(), 1);
        assert_eq!(report.dropped_performances, 1);
    }

    #[test]
    fn legacy_files_missing_columns_still_load() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(PERFORMANCES_FILE);
        fs::write(
            &path,
            "show-link-href,date,performance-time,show-availability\n/a,Mon 1 Aug,14:00,SOLD_OUT\n",
        )
        .expect("write");

        let (loaded, report) = load_dataset(dir.path()).expect("load");
        assert_eq!(report.total_dropped(), 0);
        let row = loaded.performances.values().next().expect("one row");
        assert_eq!(row.availability, Availability::SoldOut);
        assert_eq!(row.genre, None);
        assert!(row.show_name.is_empty());
    }

    #[test]
    fn snapshot_discovery_prefers_newest_and_honours_exclusion() {
        let dir = tempdir().expect("tempdir");
        for name in [
            "2026-08-01-snapshot.csv",
            "2026-08-03-snapshot.csv",
            "2026-08-02-snapshot.csv",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), "x").expect("write");
        }

        let latest = find_latest_snapshot(dir.path(), None).expect("find");
        assert_eq!(
            latest,
            Some(dir.path().join("2026-08-03-snapshot.csv"))
        );

        let previous = find_latest_snapshot(dir.path(), Some("2026-08-03")).expect("find");
        assert_eq!(
            previous,
            Some(dir.path().join("2026-08-02-snapshot.csv"))
        );
    }

    #[test]
    fn snapshot_discovery_handles_missing_directory() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        assert_eq!(find_latest_snapshot(&missing, None).expect("find"), None);
        assert!(require_latest_snapshot(&missing, None).is_err());
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempdir().expect("tempdir");
        let rows = vec![
            perf("/a", "Mon 1 Aug", "14:00", "TICKETS_AVAILABLE"),
            perf("/b", "Tue 2 Aug", "15:00", "SOLD_OUT"),
        ];
        let date = NaiveDate::from_ymd_opt(2026, 8, 3).expect("date");
        let path = save_snapshot(rows.iter(), dir.path(), date).expect("save");
        assert_eq!(path, dir.path().join("2026-08-03-snapshot.csv"));

        let (loaded, dropped) = load_performances(&path).expect("load");
        assert_eq!(dropped, 0);
        assert_eq!(loaded, rows);
    }

    #[test]
    fn write_rows_handles_dynamic_columns() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("wide.csv");
        let header = vec!["show-name".to_string(), "2026-08-01".to_string()];
        let rows = vec![vec!["Some Show".to_string(), "SOLD_OUT".to_string()]];
        write_rows(&path, &header, &rows).expect("write");

        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(text, "show-name,2026-08-01\nSome Show,SOLD_OUT\n");
    }
}
