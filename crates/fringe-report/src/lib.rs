//! Renders a [`ChangeSet`] as plain text, email-ready HTML or JSON.
//!
//! All renderers are pure; callers decide whether the output goes to stdout,
//! a file or a mail body.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use fringe_engine::{ChangeSet, PerformanceChange};

// Long categories are truncated with an "... and N more" marker so the
// report stays readable in an inbox.
const PERFS_PER_SOLD_OUT_SHOW: usize = 5;
const MAX_FLAT_ENTRIES: usize = 10;
const MAX_NEW_PERF_SHOWS: usize = 10;
const PERFS_PER_NEW_SHOW: usize = 3;

pub fn render_text(diff: &ChangeSet) -> String {
    let mut out = String::new();
    let banner = "=".repeat(60);
    let rule = "-".repeat(40);

    let _ = writeln!(out, "{banner}");
    let _ = writeln!(out, "EDINBURGH FRINGE DAILY UPDATE");
    let _ = writeln!(
        out,
        "Comparing: {} -> {}",
        diff.previous_label, diff.current_label
    );
    let _ = writeln!(out, "{banner}");
    let _ = writeln!(out);

    if !diff.has_changes() {
        let _ = writeln!(out, "No changes detected since last snapshot.");
        return out;
    }

    let _ = writeln!(out, "Total changes: {}", diff.total_changes());
    let _ = writeln!(out);

    if !diff.new_shows.is_empty() {
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "NEW SHOWS ({})", diff.new_shows.len());
        let _ = writeln!(out, "{rule}");
        for show in &diff.new_shows {
            let _ = writeln!(out);
            let _ = writeln!(out, "  {}", show.show_name);
            let _ = writeln!(out, "    Performer: {}", show.performer);
            let _ = writeln!(out, "    Performances: {}", show.performance_count);
            if !show.date_range.is_empty() {
                let _ = writeln!(out, "    Dates: {}", show.date_range);
            }
            if !show.venues.is_empty() {
                let _ = writeln!(out, "    Venue: {}", show.venues.join(", "));
            }
            let _ = writeln!(out, "    URL: {}", show.show_url);
        }
        let _ = writeln!(out);
    }

    if !diff.sold_out.is_empty() {
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "SOLD OUT ({})", diff.sold_out.len());
        let _ = writeln!(out, "{rule}");
        for (show_name, perfs) in group_by_show(&diff.sold_out) {
            let _ = writeln!(out);
            let _ = writeln!(out, "  {show_name}");
            for perf in perfs.iter().take(PERFS_PER_SOLD_OUT_SHOW) {
                let _ = writeln!(out, "    - {} {}", perf.date, perf.time);
            }
            if perfs.len() > PERFS_PER_SOLD_OUT_SHOW {
                let _ = writeln!(
                    out,
                    "    ... and {} more",
                    perfs.len() - PERFS_PER_SOLD_OUT_SHOW
                );
            }
        }
        let _ = writeln!(out);
    }

    write_flat_section(&mut out, &rule, "CANCELLED", &diff.cancelled);
    write_flat_section(&mut out, &rule, "BACK AVAILABLE", &diff.back_available);

    if !diff.new_performances.is_empty() {
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(
            out,
            "NEW PERFORMANCES FOR EXISTING SHOWS ({})",
            diff.new_performances.len()
        );
        let _ = writeln!(out, "{rule}");
        let by_show = group_by_show(&diff.new_performances);
        for (show_name, perfs) in by_show.iter().take(MAX_NEW_PERF_SHOWS) {
            let _ = writeln!(out);
            let _ = writeln!(out, "  {show_name}");
            for perf in perfs.iter().take(PERFS_PER_NEW_SHOW) {
                let _ = writeln!(out, "    + {} {} @ {}", perf.date, perf.time, perf.venue);
            }
            if perfs.len() > PERFS_PER_NEW_SHOW {
                let _ = writeln!(
                    out,
                    "    ... and {} more performances",
                    perfs.len() - PERFS_PER_NEW_SHOW
                );
            }
        }
        if by_show.len() > MAX_NEW_PERF_SHOWS {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "  ... and {} more shows with new performances",
                by_show.len() - MAX_NEW_PERF_SHOWS
            );
        }
        let _ = writeln!(out);
    }

    if !diff.removed_shows.is_empty() {
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "REMOVED SHOWS ({})", diff.removed_shows.len());
        let _ = writeln!(out, "{rule}");
        for show in diff.removed_shows.iter().take(MAX_FLAT_ENTRIES) {
            let _ = writeln!(
                out,
                "  {} ({} performances)",
                show.show_name, show.performance_count
            );
        }
        if diff.removed_shows.len() > MAX_FLAT_ENTRIES {
            let _ = writeln!(
                out,
                "  ... and {} more",
                diff.removed_shows.len() - MAX_FLAT_ENTRIES
            );
        }
        let _ = writeln!(out);
    }

    out
}

fn write_flat_section(out: &mut String, rule: &str, title: &str, entries: &[PerformanceChange]) {
    if entries.is_empty() {
        return;
    }
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "{title} ({})", entries.len());
    let _ = writeln!(out, "{rule}");
    for perf in entries.iter().take(MAX_FLAT_ENTRIES) {
        let _ = writeln!(out, "  {} - {} {}", perf.show_name, perf.date, perf.time);
    }
    if entries.len() > MAX_FLAT_ENTRIES {
        let _ = writeln!(out, "  ... and {} more", entries.len() - MAX_FLAT_ENTRIES);
    }
    let _ = writeln!(out);
}

const HTML_HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
<style>
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; color: #333; }
h1 { color: #7B2D8E; border-bottom: 3px solid #7B2D8E; padding-bottom: 10px; }
h2 { color: #444; margin-top: 30px; border-bottom: 1px solid #ddd; padding-bottom: 5px; }
.summary { background: #f5f5f5; padding: 15px; border-radius: 8px; margin: 20px 0; }
.show { background: #fff; border: 1px solid #e0e0e0; border-radius: 8px; padding: 15px; margin: 10px 0; }
.show-title { font-weight: bold; color: #7B2D8E; font-size: 1.1em; }
.show-meta { color: #666; font-size: 0.9em; margin-top: 5px; }
.performance-list { margin: 10px 0; padding-left: 20px; }
.sold-out { color: #d32f2f; }
.new { color: #2e7d32; }
.cancelled { color: #f57c00; }
.back { color: #1976d2; }
a { color: #7B2D8E; }
.badge { display: inline-block; padding: 2px 8px; border-radius: 12px; font-size: 0.8em; font-weight: bold; }
.badge-new { background: #e8f5e9; color: #2e7d32; }
.badge-soldout { background: #ffebee; color: #d32f2f; }
.badge-cancelled { background: #fff3e0; color: #f57c00; }
</style>
</head>
<body>
"#;

pub fn render_html(diff: &ChangeSet) -> String {
    let mut out = String::from(HTML_HEAD);
    let _ = writeln!(out, "<h1>Edinburgh Fringe Daily Update</h1>");
    let _ = writeln!(
        out,
        "<p><em>Comparing: {} &rarr; {}</em></p>",
        escape(&diff.previous_label),
        escape(&diff.current_label)
    );

    if !diff.has_changes() {
        let _ = writeln!(out, "<p>No changes detected since last snapshot.</p>");
        out.push_str("</body></html>\n");
        return out;
    }

    let _ = writeln!(out, r#"<div class="summary">"#);
    let _ = writeln!(out, "<strong>Summary:</strong><br>");
    if !diff.new_shows.is_empty() {
        let _ = writeln!(
            out,
            r#"<span class="new">{} new shows</span><br>"#,
            diff.new_shows.len()
        );
    }
    if !diff.sold_out.is_empty() {
        let _ = writeln!(
            out,
            r#"<span class="sold-out">{} performances sold out</span><br>"#,
            diff.sold_out.len()
        );
    }
    if !diff.cancelled.is_empty() {
        let _ = writeln!(
            out,
            r#"<span class="cancelled">{} performances cancelled</span><br>"#,
            diff.cancelled.len()
        );
    }
    if !diff.back_available.is_empty() {
        let _ = writeln!(
            out,
            r#"<span class="back">{} back available</span><br>"#,
            diff.back_available.len()
        );
    }
    if !diff.new_performances.is_empty() {
        let _ = writeln!(out, "{} new performances added<br>", diff.new_performances.len());
    }
    let _ = writeln!(out, "</div>");

    if !diff.new_shows.is_empty() {
        let _ = writeln!(
            out,
            r#"<h2 class="new">New Shows ({})</h2>"#,
            diff.new_shows.len()
        );
        for show in &diff.new_shows {
            let _ = writeln!(out, r#"<div class="show">"#);
            let _ = writeln!(
                out,
                r#"<div class="show-title"><a href="{}">{}</a> <span class="badge badge-new">NEW</span></div>"#,
                escape(&show.show_url),
                escape(&show.show_name)
            );
            let _ = writeln!(out, r#"<div class="show-meta">"#);
            let _ = writeln!(out, "Performer: {}<br>", escape(&show.performer));
            let _ = write!(out, "{} performances", show.performance_count);
            if !show.date_range.is_empty() {
                let _ = write!(out, " | {}", escape(&show.date_range));
            }
            if !show.venues.is_empty() {
                let _ = write!(out, "<br>Venue: {}", escape(&show.venues.join(", ")));
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "</div>");
            let _ = writeln!(out, "</div>");
        }
    }

    if !diff.sold_out.is_empty() {
        let _ = writeln!(
            out,
            r#"<h2 class="sold-out">Sold Out ({})</h2>"#,
            diff.sold_out.len()
        );
        for (show_name, perfs) in group_by_show(&diff.sold_out) {
            let _ = writeln!(out, r#"<div class="show">"#);
            let _ = writeln!(
                out,
                r#"<div class="show-title"><a href="{}">{}</a> <span class="badge badge-soldout">SOLD OUT</span></div>"#,
                escape(&perfs[0].show_url),
                escape(show_name)
            );
            let _ = writeln!(out, r#"<ul class="performance-list">"#);
            for perf in perfs.iter().take(PERFS_PER_SOLD_OUT_SHOW) {
                let _ = writeln!(out, "<li>{} {}</li>", escape(&perf.date), escape(&perf.time));
            }
            if perfs.len() > PERFS_PER_SOLD_OUT_SHOW {
                let _ = writeln!(
                    out,
                    "<li><em>... and {} more</em></li>",
                    perfs.len() - PERFS_PER_SOLD_OUT_SHOW
                );
            }
            let _ = writeln!(out, "</ul></div>");
        }
    }

    write_flat_html_section(&mut out, "cancelled", "Cancelled", &diff.cancelled);
    write_flat_html_section(&mut out, "back", "Back Available", &diff.back_available);

    if !diff.new_performances.is_empty() {
        let _ = writeln!(
            out,
            "<h2>New Performances ({})</h2>",
            diff.new_performances.len()
        );
        let by_show = group_by_show(&diff.new_performances);
        for (show_name, perfs) in by_show.iter().take(MAX_NEW_PERF_SHOWS) {
            let _ = writeln!(out, r#"<div class="show">"#);
            let _ = writeln!(
                out,
                r#"<div class="show-title"><a href="{}">{}</a></div>"#,
                escape(&perfs[0].show_url),
                escape(show_name)
            );
            let _ = writeln!(out, r#"<ul class="performance-list">"#);
            for perf in perfs.iter().take(PERFS_PER_NEW_SHOW) {
                let _ = writeln!(
                    out,
                    "<li>{} {} @ {}</li>",
                    escape(&perf.date),
                    escape(&perf.time),
                    escape(&perf.venue)
                );
            }
            if perfs.len() > PERFS_PER_NEW_SHOW {
                let _ = writeln!(
                    out,
                    "<li><em>... and {} more</em></li>",
                    perfs.len() - PERFS_PER_NEW_SHOW
                );
            }
            let _ = writeln!(out, "</ul></div>");
        }
        if by_show.len() > MAX_NEW_PERF_SHOWS {
            let _ = writeln!(
                out,
                "<p><em>... and {} more shows</em></p>",
                by_show.len() - MAX_NEW_PERF_SHOWS
            );
        }
    }

    if !diff.removed_shows.is_empty() {
        let _ = writeln!(out, "<h2>Removed Shows ({})</h2>", diff.removed_shows.len());
        for show in diff.removed_shows.iter().take(MAX_FLAT_ENTRIES) {
            let _ = writeln!(
                out,
                r#"<div class="show">{} ({} performances)</div>"#,
                escape(&show.show_name),
                show.performance_count
            );
        }
        if diff.removed_shows.len() > MAX_FLAT_ENTRIES {
            let _ = writeln!(
                out,
                "<p><em>... and {} more</em></p>",
                diff.removed_shows.len() - MAX_FLAT_ENTRIES
            );
        }
    }

    out.push_str("</body></html>\n");
    out
}

fn write_flat_html_section(
    out: &mut String,
    class: &str,
    title: &str,
    entries: &[PerformanceChange],
) {
    if entries.is_empty() {
        return;
    }
    let _ = writeln!(out, r#"<h2 class="{class}">{title} ({})</h2>"#, entries.len());
    for perf in entries.iter().take(MAX_FLAT_ENTRIES) {
        let _ = writeln!(
            out,
            r#"<div class="show"><a href="{}">{}</a> - {} {}</div>"#,
            escape(&perf.show_url),
            escape(&perf.show_name),
            escape(&perf.date),
            escape(&perf.time)
        );
    }
    if entries.len() > MAX_FLAT_ENTRIES {
        let _ = writeln!(out, "<p><em>... and {} more</em></p>", entries.len() - MAX_FLAT_ENTRIES);
    }
}

pub fn render_json(diff: &ChangeSet) -> Result<String> {
    serde_json::to_string_pretty(diff).context("serializing change report to JSON")
}

/// Group entries per show, preserving the incoming (already sorted) order.
fn group_by_show(entries: &[PerformanceChange]) -> Vec<(&str, Vec<&PerformanceChange>)> {
    let mut grouped: Vec<(&str, Vec<&PerformanceChange>)> = Vec::new();
    for perf in entries {
        match grouped.last_mut() {
            Some((name, perfs)) if *name == perf.show_name => perfs.push(perf),
            _ => grouped.push((perf.show_name.as_str(), vec![perf])),
        }
    }
    grouped
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fringe_engine::{ShowChange, Snapshot};

    fn perf_change(show: &str, date: &str, time: &str) -> PerformanceChange {
        PerformanceChange {
            show_name: show.to_string(),
            show_url: format!("/{}", show.to_lowercase().replace(' ', "-")),
            performer: "Performer".to_string(),
            venue: "Venue A".to_string(),
            date: date.to_string(),
            time: time.to_string(),
            old_value: Some("TICKETS_AVAILABLE".to_string()),
            new_value: Some("SOLD_OUT".to_string()),
        }
    }

    fn sample_diff() -> ChangeSet {
        ChangeSet {
            previous_label: "2026-08-01 06:00".to_string(),
            current_label: "2026-08-02 06:00".to_string(),
            new_shows: vec![ShowChange {
                show_name: "Brand New Show".to_string(),
                show_url: "/brand-new-show".to_string(),
                performer: "The Performers".to_string(),
                performance_count: 4,
                venues: vec!["Venue A".to_string()],
                date_range: "Mon 3 Aug - Thu 6 Aug".to_string(),
            }],
            sold_out: vec![
                perf_change("Alpha", "Mon 3 Aug", "19:30"),
                perf_change("Alpha", "Tue 4 Aug", "19:30"),
            ],
            cancelled: vec![],
            back_available: vec![],
            new_performances: vec![],
            removed_shows: vec![],
        }
    }

    #[test]
    fn text_report_has_sections_in_order_and_omits_empty_ones() {
        let text = render_text(&sample_diff());
        let new_idx = text.find("NEW SHOWS (1)").expect("new shows section");
        let sold_idx = text.find("SOLD OUT (2)").expect("sold out section");
        assert!(new_idx < sold_idx);
        assert!(!text.contains("CANCELLED"));
        assert!(!text.contains("BACK AVAILABLE"));
        assert!(!text.contains("REMOVED SHOWS"));
        assert!(text.contains("Total changes: 3"));
        assert!(text.contains("Dates: Mon 3 Aug - Thu 6 Aug"));
    }

    #[test]
    fn text_report_without_changes_says_so() {
        let diff = ChangeSet {
            previous_label: "a".to_string(),
            current_label: "b".to_string(),
            ..Default::default()
        };
        let text = render_text(&diff);
        assert!(text.contains("No changes detected since last snapshot."));
        assert!(!text.contains("Total changes"));
    }

    #[test]
    fn text_report_truncates_long_sold_out_lists() {
        let mut diff = sample_diff();
        diff.sold_out = (1..=8)
            .map(|day| perf_change("Alpha", &format!("Aug {day}"), "19:30"))
            .collect();
        let text = render_text(&diff);
        assert!(text.contains("... and 3 more"));
    }

    #[test]
    fn html_report_links_shows_and_carries_summary() {
        let html = render_html(&sample_diff());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains(r#"<a href="/brand-new-show">Brand New Show</a>"#));
        assert!(html.contains(r#"<span class="new">1 new shows</span>"#));
        assert!(html.contains(r#"<span class="sold-out">2 performances sold out</span>"#));
        assert!(html.ends_with("</body></html>\n"));
    }

    #[test]
    fn html_escapes_markup_in_names() {
        let mut diff = sample_diff();
        diff.sold_out = vec![perf_change("Tom & <Jerry>", "Mon 3 Aug", "19:30")];
        let html = render_html(&diff);
        assert!(html.contains("Tom &amp; &lt;Jerry&gt;"));
        assert!(!html.contains("Tom & <Jerry>"));
    }

    #[test]
    fn json_report_round_trips_counts() {
        let diff = sample_diff();
        let json = render_json(&diff).expect("serializes");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parses");
        assert_eq!(value["new_shows"].as_array().unwrap().len(), 1);
        assert_eq!(value["sold_out"].as_array().unwrap().len(), 2);
        assert_eq!(value["previous_label"], "2026-08-01 06:00");
    }

    #[test]
    fn renders_diff_produced_by_compare() {
        // End to end through the comparator, so renderer and engine agree
        // on field shapes.
        let prev = Snapshot::from_performances("prev", vec![]);
        let cur = Snapshot::from_performances(
            "cur",
            vec![fringe_core::Performance {
                show_url: "/solo".to_string(),
                show_name: "Solo Hour".to_string(),
                performer: "Someone".to_string(),
                date: "Wednesday 05 August".to_string(),
                time: "19:30".to_string(),
                availability: fringe_core::Availability::TicketsAvailable,
                venue: "Venue B".to_string(),
                genre: None,
                scraped_at: None,
            }],
        );
        let diff = fringe_engine::compare(&prev, &cur);
        let text = render_text(&diff);
        assert!(text.contains("NEW SHOWS (1)"));
        assert!(text.contains("Solo Hour"));
    }
}
