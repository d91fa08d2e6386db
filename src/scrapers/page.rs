//! Listing-row scraper.
//!
//! Reads every row matching the listing selector and parses it. Bad rows are
//! logged and skipped; only a failure to query the page fails the scrape.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::record::{check_schema, parse_record, ParseError};
use crate::browser::{PageElement, SessionError, WebSession};
use crate::models::RunBatch;

/// Batch-level scrape failure.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("querying rows with {selector:?} failed: {source}")]
    Query {
        selector: String,
        #[source]
        source: SessionError,
    },

    #[error(transparent)]
    Schema(#[from] ParseError),
}

/// Records from one scrape pass plus the number of rows that were dropped.
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub batch: RunBatch,
    pub skipped: usize,
}

/// Scrape all rows matching `selector`, tagging each record with `archived`.
pub async fn scrape_records<S: WebSession>(
    session: &S,
    selector: &str,
    archived: &str,
    schema_version: u32,
) -> Result<ScrapeReport, ScrapeError> {
    check_schema(schema_version)?;

    let rows = session
        .query_selector_all(selector)
        .await
        .map_err(|source| ScrapeError::Query {
            selector: selector.to_string(),
            source,
        })?;
    debug!("Found {} rows matching {:?}", rows.len(), selector);

    let mut report = ScrapeReport::default();
    for (index, row) in rows.iter().enumerate() {
        let text = match row.text_content().await {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping row {}: could not read text: {}", index, e);
                report.skipped += 1;
                continue;
            }
        };

        match parse_record(&text, archived) {
            Ok(record) => report.batch.push(record),
            Err(e) => {
                warn!("Skipping row {}: {}", index, e);
                report.skipped += 1;
            }
        }
    }

    info!(
        "Scraped {} {} records ({} skipped)",
        report.batch.len(),
        archived.to_lowercase(),
        report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::SnapshotSession;
    use crate::scrapers::record::SCHEMA_VERSION;

    fn listing(rows: &[&str]) -> String {
        let body: String = rows
            .iter()
            .map(|r| format!("<div class=\"project-row\">{}</div>\n", r))
            .collect();
        format!("<html><body>{}</body></html>", body)
    }

    fn row(id: u32) -> String {
        format!("{} Oak Ave00042|{}|Pending|BP-{}|a|b|SYS-{}|c|2024-02-0{}|Unit {}", id, id, id, id, id, id)
    }

    #[tokio::test]
    async fn test_malformed_row_is_skipped() {
        let rows = [row(1), row(2), "broken|row".to_string(), row(4), row(5)];
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let session = SnapshotSession::new(listing(&refs));

        let report = scrape_records(&session, ".project-row", "Active", SCHEMA_VERSION)
            .await
            .unwrap();

        assert_eq!(report.batch.len(), 4);
        assert_eq!(report.skipped, 1);
        let ids: Vec<i64> = report.batch.iter().map(|r| r.reference_id()).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
        assert!(report.batch.iter().all(|r| r.archived() == "Active"));
    }

    #[tokio::test]
    async fn test_rows_built_from_cells() {
        let html = r#"<table><tr class="project-row">
            <td>77 Pine Ct55555</td><td>8</td><td>Approved</td><td></td><td>-</td>
            <td>-</td><td>SYS-8</td><td>-</td><td>2023-12-31</td><td>Unit 8</td>
        </tr></table>"#;
        let session = SnapshotSession::new(html);

        let report = scrape_records(&session, ".project-row", "Archived", SCHEMA_VERSION)
            .await
            .unwrap();

        let record = &report.batch.records()[0];
        assert_eq!(record.address(), "77 Pine Ct");
        assert_eq!(record.reference_id(), 8);
        assert_eq!(record.application_number(), None);
        assert_eq!(record.archived(), "Archived");
    }

    #[tokio::test]
    async fn test_no_rows_is_empty_batch() {
        let session = SnapshotSession::new("<html><body></body></html>");
        let report = scrape_records(&session, ".project-row", "Active", SCHEMA_VERSION)
            .await
            .unwrap();
        assert!(report.batch.is_empty());
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn test_query_failure_is_scrape_error() {
        let session = SnapshotSession::new(listing(&[]));
        let err = scrape_records(&session, "div[", "Active", SCHEMA_VERSION)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Query { .. }));
    }

    #[tokio::test]
    async fn test_unknown_schema_rejected_before_query() {
        let session = SnapshotSession::new(listing(&[]));
        let err = scrape_records(&session, ".project-row", "Active", 99)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::Schema(ParseError::UnsupportedSchema(99))
        ));
    }
}
