use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::warn;

use crate::models::queue::{ItemResult, Lease, QueueItem, QueueItemStatus, QueueStats, SendOutcome};

use super::client::{ListQuery, Record, RecordPatch, RowStoreClient, UpsertRecord};
use super::{escape_formula, iso, EnqueueOutcome, FlushReport, QueueStore, StoreError};

pub const QUEUE_TABLE: &str = "NewsletterQueue";

#[derive(Debug, Deserialize)]
struct QueueFields {
    #[serde(rename = "JobId", default)]
    job_id: String,
    #[serde(rename = "Email", default)]
    email: String,
    #[serde(rename = "Status")]
    status: QueueItemStatus,
    #[serde(rename = "ClaimedAt", default)]
    claimed_at: Option<DateTime<Utc>>,
    #[serde(rename = "ClaimedBy", default)]
    claimed_by: Option<String>,
    #[serde(rename = "SentAt", default)]
    sent_at: Option<DateTime<Utc>>,
    #[serde(rename = "RetryCount", default)]
    retry_count: i32,
    #[serde(rename = "LastError", default)]
    last_error: Option<String>,
}

/// Narrow row for status scans (stats, counts, retry).
#[derive(Debug, Deserialize)]
struct StatusFields {
    #[serde(rename = "Status")]
    status: QueueItemStatus,
    #[serde(rename = "ClaimedAt", default)]
    claimed_at: Option<DateTime<Utc>>,
}

fn to_item(record: Record<QueueFields>) -> QueueItem {
    let fields = record.fields;
    QueueItem {
        record_id: record.id,
        job_id: fields.job_id,
        email: fields.email,
        status: fields.status,
        claimed_at: fields.claimed_at,
        claimed_by: fields.claimed_by,
        sent_at: fields.sent_at,
        retry_count: fields.retry_count,
        last_error: fields.last_error,
    }
}

/// Pending rows that are unclaimed or whose claim stamp predates `cutoff`.
fn claimable_formula(job_id: &str, cutoff: &str) -> String {
    format!(
        r#"AND({{JobId}} = "{}", {{Status}} = "pending", OR({{ClaimedAt}} = BLANK(), IS_BEFORE({{ClaimedAt}}, "{}")))"#,
        escape_formula(job_id),
        cutoff,
    )
}

fn status_formula(job_id: &str, status: QueueItemStatus) -> String {
    format!(
        r#"AND({{JobId}} = "{}", {{Status}} = "{}")"#,
        escape_formula(job_id),
        status,
    )
}

fn job_formula(job_id: &str) -> String {
    format!(r#"{{JobId}} = "{}""#, escape_formula(job_id))
}

fn outcome_fields(outcome: &SendOutcome) -> serde_json::Value {
    match outcome {
        SendOutcome::Sent { at } => json!({
            "Status": QueueItemStatus::Success.to_string(),
            "SentAt": iso(*at),
            "ClaimedAt": null,
            "ClaimedBy": null,
        }),
        SendOutcome::Failed { error, retry_count } => json!({
            "Status": QueueItemStatus::Failed.to_string(),
            "LastError": error,
            "RetryCount": retry_count,
            "ClaimedAt": null,
            "ClaimedBy": null,
        }),
    }
}

#[async_trait]
impl QueueStore for RowStoreClient {
    async fn enqueue_recipients(
        &self,
        job_id: &str,
        emails: &[String],
    ) -> Result<EnqueueOutcome, StoreError> {
        let mut outcome = EnqueueOutcome::default();
        let mut chunks = emails.chunks(self.write_batch_size).peekable();
        while let Some(chunk) = chunks.next() {
            let records: Vec<UpsertRecord> = chunk
                .iter()
                .map(|email| UpsertRecord {
                    fields: json!({
                        "Key": QueueItem::dedup_key(job_id, email),
                        "JobId": job_id,
                        "Email": email,
                        "Status": QueueItemStatus::Pending.to_string(),
                        "RetryCount": 0,
                    }),
                })
                .collect();

            match self.upsert_chunk(QUEUE_TABLE, "Key", records).await {
                Ok(page) => {
                    outcome.enqueued += page.records.len() as u32;
                    outcome.created += page.created_records.len() as u32;
                }
                Err(e) => {
                    warn!(job_id, error = %e, count = chunk.len(), "queue upsert chunk failed");
                    outcome.failed += chunk.len() as u32;
                }
            }

            if chunks.peek().is_some() {
                sleep(self.request_delay).await;
            }
        }
        Ok(outcome)
    }

    async fn claim_batch(
        &self,
        job_id: &str,
        lease: &Lease,
        limit: usize,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let cutoff = iso(lease.expiry_cutoff(Utc::now()));
        let formula = claimable_formula(job_id, &cutoff);
        let records: Vec<Record<QueueFields>> = self
            .list(
                QUEUE_TABLE,
                &ListQuery::new().filter(formula).max_records(limit),
            )
            .await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        // Stamp the claim. This is best-effort mutual exclusion: a failed
        // stamp write leaves the row visible to other workers.
        let stamp = iso(Utc::now());
        let patches: Vec<RecordPatch> = records
            .iter()
            .map(|record| RecordPatch {
                id: record.id.clone(),
                fields: json!({ "ClaimedAt": stamp, "ClaimedBy": lease.id }),
            })
            .collect();
        let written = self.patch_records(QUEUE_TABLE, &patches).await;
        if written.failed > 0 {
            warn!(
                job_id,
                lease = %lease.id,
                failed = written.failed,
                "claim stamps not fully written; rows may be picked up twice"
            );
        }

        Ok(records.into_iter().map(to_item).collect())
    }

    async fn flush_results(&self, results: &[ItemResult]) -> Result<FlushReport, StoreError> {
        let mut report = FlushReport::default();
        let mut chunks = results.chunks(self.write_batch_size).peekable();
        while let Some(chunk) = chunks.next() {
            let patches: Vec<RecordPatch> = chunk
                .iter()
                .map(|result| RecordPatch {
                    id: result.record_id.clone(),
                    fields: outcome_fields(&result.outcome),
                })
                .collect();

            match self.patch_chunk(QUEUE_TABLE, &patches).await {
                Ok(()) => {
                    for result in chunk {
                        match result.outcome {
                            SendOutcome::Sent { .. } => report.recorded_success += 1,
                            SendOutcome::Failed { .. } => report.recorded_failed += 1,
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, count = chunk.len(), "result flush chunk failed; rows stay claimable");
                    report.dropped += chunk.len();
                }
            }

            if chunks.peek().is_some() {
                sleep(self.request_delay).await;
            }
        }
        Ok(report)
    }

    async fn count_pending(&self, job_id: &str) -> Result<usize, StoreError> {
        let formula = status_formula(job_id, QueueItemStatus::Pending);
        let records: Vec<Record<StatusFields>> = self
            .list(
                QUEUE_TABLE,
                &ListQuery::new().filter(formula).fields(&["Status"]),
            )
            .await?;
        Ok(records.len())
    }

    async fn stats(&self, job_id: &str) -> Result<QueueStats, StoreError> {
        let records: Vec<Record<StatusFields>> = self
            .list(
                QUEUE_TABLE,
                &ListQuery::new()
                    .filter(job_formula(job_id))
                    .fields(&["Status", "ClaimedAt"]),
            )
            .await?;

        let mut stats = QueueStats {
            total: records.len(),
            ..Default::default()
        };
        for record in &records {
            match record.fields.status {
                QueueItemStatus::Pending if record.fields.claimed_at.is_some() => {
                    stats.claimed += 1
                }
                QueueItemStatus::Pending => stats.pending += 1,
                QueueItemStatus::Success => stats.success += 1,
                QueueItemStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn reset_failed(&self, job_id: &str) -> Result<usize, StoreError> {
        let formula = status_formula(job_id, QueueItemStatus::Failed);
        let records: Vec<Record<StatusFields>> = self
            .list(
                QUEUE_TABLE,
                &ListQuery::new().filter(formula).fields(&["Status"]),
            )
            .await?;
        if records.is_empty() {
            return Ok(0);
        }

        let patches: Vec<RecordPatch> = records
            .iter()
            .map(|record| RecordPatch {
                id: record.id.clone(),
                fields: json!({
                    "Status": QueueItemStatus::Pending.to_string(),
                    "LastError": "",
                }),
            })
            .collect();
        let written = self.patch_records(QUEUE_TABLE, &patches).await;
        if written.failed > 0 {
            warn!(job_id, failed = written.failed, "some failed rows were not reset");
        }
        Ok(written.applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claimable_formula_admits_unclaimed_and_expired() {
        let formula = claimable_formula("aug-news", "2026-08-25T12:00:00.000Z");
        assert_eq!(
            formula,
            r#"AND({JobId} = "aug-news", {Status} = "pending", OR({ClaimedAt} = BLANK(), IS_BEFORE({ClaimedAt}, "2026-08-25T12:00:00.000Z")))"#
        );
    }

    #[test]
    fn test_status_formula_uses_wire_status_names() {
        assert_eq!(
            status_formula("aug-news", QueueItemStatus::Failed),
            r#"AND({JobId} = "aug-news", {Status} = "failed")"#
        );
    }

    #[test]
    fn test_formula_escapes_embedded_quotes() {
        let formula = job_formula(r#"odd"id"#);
        assert_eq!(formula, r#"{JobId} = "odd\"id""#);
    }

    #[test]
    fn test_outcome_fields_clear_claim_stamps() {
        let sent = outcome_fields(&SendOutcome::Sent { at: Utc::now() });
        assert_eq!(sent["Status"], "success");
        assert!(sent["ClaimedAt"].is_null());
        assert!(sent["ClaimedBy"].is_null());

        let failed = outcome_fields(&SendOutcome::Failed {
            error: "mail API returned 400: bad request".to_string(),
            retry_count: 2,
        });
        assert_eq!(failed["Status"], "failed");
        assert_eq!(failed["RetryCount"], 2);
        assert!(failed["ClaimedAt"].is_null());
    }
}
