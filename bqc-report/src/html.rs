//! Static HTML rendering of a [`Report`]
//!
//! The page lives at `results/report/report.html`; montage links are
//! relative so the results directory can be moved or archived whole.

use crate::{RatingCounts, Report, ReportItem};
use bqc_common::html::{encode_query, escape};
use bqc_common::model::VolumeStats;
use bqc_common::{Rating, ReviewRecord};

const STYLE: &str = r#"
        body {
            font-family: system-ui, -apple-system, sans-serif;
            max-width: 1400px;
            margin: 30px auto;
            padding: 0 20px;
            line-height: 1.5;
        }
        h1 { color: #333; border-bottom: 2px solid #0066cc; padding-bottom: 10px; }
        table { border-collapse: collapse; margin-bottom: 24px; }
        th, td { border-bottom: 1px solid #ddd; padding: 6px 8px; text-align: left; vertical-align: top; }
        th { background: #f5f5f5; }
        .rating-pass, .status-succeeded { color: #1a7f37; font-weight: bold; }
        .rating-fail, .status-failed { color: #cf222e; font-weight: bold; }
        .rating-uncertain { color: #9a6700; font-weight: bold; }
        .unrated, .excluded, .status-superseded { color: #888; }
        .stats { font-size: 0.85em; white-space: nowrap; }
        .error { font-family: monospace; font-size: 0.85em; white-space: pre-wrap; }
"#;

/// Montage links are relative to `results/report/`
const RESULTS_PREFIX: &str = "../";

fn rating_cell(record: Option<&ReviewRecord>) -> String {
    match record {
        Some(r) => {
            let mut cell = format!(r#"<span class="rating-{0}">{0}</span>"#, r.rating.as_str());
            if !r.annotation.is_empty() {
                cell.push_str(&format!("<br><small>{}</small>", escape(&r.annotation)));
            }
            cell
        }
        None => r#"<span class="unrated">unrated</span>"#.to_string(),
    }
}

fn counts_table(title: &str, counts: &RatingCounts) -> String {
    let mut rows = String::new();
    for rating in Rating::ALL.iter().copied().map(Some).chain([None]) {
        let label = rating.map(|r| r.as_str()).unwrap_or("unrated");
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>",
            label,
            counts.get(rating)
        ));
    }
    format!(
        r#"
    <h2>{title}</h2>
    <table>
        <tr><th>Rating</th><th>Items</th></tr>{rows}
        <tr><th>Total</th><th>{total}</th></tr>
    </table>"#,
        title = escape(title),
        rows = rows,
        total = counts.total(),
    )
}

fn stats_cell(stats: Option<&VolumeStats>) -> String {
    match stats {
        Some(s) => format!(
            r#"<span class="stats">mean {:.2}<br>median {:.2}<br>range {:.2} to {:.2}<br>std {:.2}</span>"#,
            s.mean, s.median, s.min, s.max, s.std
        ),
        None => String::new(),
    }
}

fn item_row(n: usize, entry: &ReportItem) -> String {
    let key = &entry.item.key;

    let gate = match entry.exclusion {
        None => "approved".to_string(),
        Some(reason) => format!(r#"<span class="excluded">excluded ({})</span>"#, escape(&reason.to_string())),
    };

    let processing = entry.current_processing();
    let status = match entry.processing_label() {
        "" => String::new(),
        s => format!(r#"<span class="status-{0}">{0}</span>"#, s),
    };
    let failure = processing
        .and_then(|r| {
            r.failed_step.as_ref().map(|step| {
                format!(
                    r#"<br>{}: <span class="error">{}</span>"#,
                    escape(step),
                    escape(r.error.as_deref().unwrap_or(""))
                )
            })
        })
        .unwrap_or_default();

    let links: String = entry
        .montages
        .iter()
        .map(|link| {
            format!(
                r#"<a href="{prefix}{url}">{label}</a><br>"#,
                prefix = RESULTS_PREFIX,
                url = escape(&encode_query(&link.url)),
                label = escape(&link.label),
            )
        })
        .collect();

    format!(
        r#"
        <tr>
            <td>{n}</td>
            <td>{subject}</td>
            <td>{session}</td>
            <td>{scan}</td>
            <td>{stats}</td>
            <td>{initial}</td>
            <td>{gate}</td>
            <td>{status}{failure}</td>
            <td>{final_rating}</td>
            <td>{links}</td>
        </tr>"#,
        n = n,
        subject = escape(&key.subject),
        session = escape(key.session_label()),
        scan = escape(&key.scan),
        stats = stats_cell(entry.stats.as_ref()),
        initial = rating_cell(entry.initial.as_ref()),
        gate = gate,
        status = status,
        failure = failure,
        final_rating = if processing.is_some_and(|r| r.succeeded()) {
            rating_cell(entry.final_review.as_ref())
        } else {
            String::new()
        },
        links = links,
    )
}

/// Render the whole report page
pub fn render(report: &Report) -> String {
    let summary = &report.summary;

    let rows: String = report
        .items
        .iter()
        .enumerate()
        .map(|(idx, entry)| item_row(idx + 1, entry))
        .collect();

    let body = format!(
        r#"
    <h1>Structural QC report</h1>
    <p>Dataset: <code>{root}</code><br>Generated: {generated}</p>
    {initial}
    <h2>Selection gate</h2>
    <table>
        <tr><th>Approved</th><td>{approved}</td></tr>
        <tr><th>Excluded</th><td>{excluded}</td></tr>
    </table>
    <h2>Correction pipeline</h2>
    <table>
        <tr><th>Succeeded</th><td>{succeeded}</td></tr>
        <tr><th>Failed</th><td>{failed}</td></tr>
        <tr><th>Not processed</th><td>{not_processed}</td></tr>
        <tr><th>Superseded</th><td>{superseded}</td></tr>
    </table>
    {final_counts}
    <h2>Items</h2>
    <table>
        <tr><th>#</th><th>Subject</th><th>Session</th><th>Scan</th><th>Intensity</th><th>Initial review</th><th>Gate</th><th>Processing</th><th>Final review</th><th>Montages</th></tr>{rows}
    </table>"#,
        root = escape(&report.bids_root.display().to_string()),
        generated = report.generated_at.to_rfc3339(),
        initial = counts_table("Initial review", &summary.initial),
        approved = summary.approved,
        excluded = summary.excluded,
        succeeded = summary.succeeded,
        failed = summary.failed,
        not_processed = summary.not_processed,
        superseded = summary.superseded,
        final_counts = counts_table("Final review", &summary.final_review),
        rows = rows,
    );

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Structural QC report</title>
    <style>{style}</style>
</head>
<body>
{body}
    <p><small>report-struct v{version}</small></p>
</body>
</html>
"#,
        style = STYLE,
        body = body,
        version = env!("CARGO_PKG_VERSION"),
    )
}
