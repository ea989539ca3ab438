//! Change consumer: logs rows announced by the store's change feed.
//!
//! A batch is a JSON array of `{Id, Payload, Processed}`. Any key may be
//! absent; the Postgres feed publishes keys only and fills `Payload` in from
//! the table before logging. This side has no channel back to the ingestion
//! endpoint; the table is the only link.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// One changed row as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub processed: Option<bool>,
}

/// What a batch turned out to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReport {
    Records(usize),
    Empty,
    Malformed,
}

/// Log every record in `raw`.
///
/// Never fails: an unparsable batch is logged together with its raw content
/// and reported as `Malformed`.
pub fn handle_batch(raw: &str) -> BatchReport {
    match parse_batch(raw) {
        Some(records) => handle_records(&records),
        None => BatchReport::Malformed,
    }
}

/// Parse a raw batch. `None` (after logging) when it is not a record array.
pub fn parse_batch(raw: &str) -> Option<Vec<ChangeRecord>> {
    info!("change feed fired");

    match serde_json::from_str(raw) {
        Ok(records) => Some(records),
        Err(err) => {
            error!(error = %err, "failed to parse change batch");
            error!(raw = %raw, "raw change batch content");
            None
        }
    }
}

/// Log already parsed records.
pub fn handle_records(records: &[ChangeRecord]) -> BatchReport {
    if records.is_empty() {
        info!("change feed fired but no changes detected");
        return BatchReport::Empty;
    }

    for record in records {
        info!(
            id = ?record.id,
            payload = ?record.payload,
            processed = ?record.processed,
            "task row changed"
        );
    }
    BatchReport::Records(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn logs_each_record() {
        let raw = r#"[{"Id":1,"Payload":"a","Processed":false},{"Id":2,"Payload":"b","Processed":true}]"#;
        assert_eq!(handle_batch(raw), BatchReport::Records(2));
    }

    #[test]
    fn empty_array_means_no_changes() {
        assert_eq!(handle_batch("[]"), BatchReport::Empty);
    }

    #[test]
    fn partial_records_are_tolerated() {
        let records: Vec<ChangeRecord> = serde_json::from_str(r#"[{"Id":3}]"#).unwrap();
        assert_eq!(records[0].id, Some(3));
        assert_eq!(records[0].payload, None);
        assert_eq!(handle_batch(r#"[{"Id":3}]"#), BatchReport::Records(1));
    }

    #[rstest]
    #[case::garbage("not json")]
    #[case::object(r#"{"Id":1}"#)]
    #[case::wrong_type(r#"[{"Id":"one"}]"#)]
    #[case::empty("")]
    fn malformed_batches_do_not_propagate(#[case] raw: &str) {
        assert_eq!(handle_batch(raw), BatchReport::Malformed);
    }

    #[test]
    fn keys_only_batch_parses() {
        let records = parse_batch(r#"[{"Id":9,"Processed":false}]"#).unwrap();
        assert_eq!(
            records,
            vec![ChangeRecord {
                id: Some(9),
                payload: None,
                processed: Some(false),
            }]
        );
        assert_eq!(handle_records(&records), BatchReport::Records(1));
    }

    #[test]
    fn parse_rejects_non_array() {
        assert_eq!(parse_batch(r#"{"Id":1}"#), None);
    }

    #[test]
    fn record_uses_pascal_case_keys() {
        let record = ChangeRecord {
            id: Some(1),
            payload: Some("p".to_string()),
            processed: Some(false),
        };
        let v = serde_json::to_value(record).unwrap();
        assert_eq!(v, serde_json::json!({"Id": 1, "Payload": "p", "Processed": false}));
    }
}
