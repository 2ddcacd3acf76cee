use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use super::StoreError;

/// One row from the store, with its table-specific field payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Record<F> {
    pub id: String,
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<DateTime<Utc>>,
    pub fields: F,
}

#[derive(Debug, Deserialize)]
struct RecordPage<F> {
    records: Vec<Record<F>>,
    #[serde(default)]
    offset: Option<String>,
}

/// Partial update for one record.
#[derive(Debug, Serialize)]
pub struct RecordPatch {
    pub id: String,
    pub fields: serde_json::Value,
}

#[derive(Serialize)]
struct PatchBody<'a> {
    records: &'a [RecordPatch],
}

/// Record payload for an upsert request (no id; matched on the merge field).
#[derive(Debug, Serialize)]
pub struct UpsertRecord {
    pub fields: serde_json::Value,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    #[serde(rename = "performUpsert")]
    perform_upsert: UpsertSpec<'a>,
    records: Vec<UpsertRecord>,
}

#[derive(Serialize)]
struct UpsertSpec<'a> {
    #[serde(rename = "fieldsToMergeOn")]
    fields_to_merge_on: [&'a str; 1],
}

/// Upsert response; the store reports which record ids were new.
#[derive(Debug, Deserialize)]
pub struct UpsertPage {
    pub records: Vec<Record<serde_json::Value>>,
    #[serde(rename = "createdRecords", default)]
    pub created_records: Vec<String>,
    #[serde(rename = "updatedRecords", default)]
    pub updated_records: Vec<String>,
}

/// Applied/failed record counts for a tolerant batched write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub failed: usize,
}

/// Query options for a table list call.
#[derive(Debug, Default, Clone)]
pub struct ListQuery {
    filter: Option<String>,
    max_records: Option<usize>,
    fields: Vec<&'static str>,
    sort_desc: Option<&'static str>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, formula: impl Into<String>) -> Self {
        self.filter = Some(formula.into());
        self
    }

    pub fn max_records(mut self, n: usize) -> Self {
        self.max_records = Some(n);
        self
    }

    pub fn fields(mut self, fields: &[&'static str]) -> Self {
        self.fields = fields.to_vec();
        self
    }

    pub fn sort_desc(mut self, field: &'static str) -> Self {
        self.sort_desc = Some(field);
        self
    }

    fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(formula) = &self.filter {
            pairs.push(("filterByFormula".to_string(), formula.clone()));
        }
        if let Some(n) = self.max_records {
            pairs.push(("maxRecords".to_string(), n.to_string()));
        }
        for field in &self.fields {
            pairs.push(("fields[]".to_string(), (*field).to_string()));
        }
        if let Some(field) = self.sort_desc {
            pairs.push(("sort[0][field]".to_string(), field.to_string()));
            pairs.push(("sort[0][direction]".to_string(), "desc".to_string()));
        }
        pairs
    }
}

/// HTTP client for an Airtable-compatible row store.
///
/// Writes go out in chunks of `write_batch_size` records with
/// `request_delay` between requests, keeping under the store's rate limit.
/// Reads that paginate pace themselves the same way.
pub struct RowStoreClient {
    http: Client,
    base_url: String,
    api_key: String,
    pub(crate) write_batch_size: usize,
    pub(crate) request_delay: Duration,
}

impl RowStoreClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        write_batch_size: usize,
        request_delay: Duration,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            write_batch_size,
            request_delay,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Fetch one page of records.
    async fn list_page<F: DeserializeOwned>(
        &self,
        table: &str,
        query: &ListQuery,
        offset: Option<&str>,
    ) -> Result<(Vec<Record<F>>, Option<String>), StoreError> {
        let mut pairs = query.query_pairs();
        if let Some(offset) = offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }

        let response = self
            .http
            .get(self.table_url(table))
            .bearer_auth(&self.api_key)
            .query(&pairs)
            .send()
            .await?;

        let page: RecordPage<F> = Self::check(response).await?.json().await?;
        Ok((page.records, page.offset))
    }

    /// Fetch matching records, following pagination offsets. The store caps
    /// the total itself when the query carries `maxRecords`.
    pub async fn list<F: DeserializeOwned>(
        &self,
        table: &str,
        query: &ListQuery,
    ) -> Result<Vec<Record<F>>, StoreError> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let (mut page, next) = self.list_page(table, query, offset.as_deref()).await?;
            records.append(&mut page);
            match next {
                Some(next) => {
                    offset = Some(next);
                    sleep(self.request_delay).await;
                }
                None => break,
            }
        }
        Ok(records)
    }

    pub async fn get_record<F: DeserializeOwned>(
        &self,
        table: &str,
        record_id: &str,
    ) -> Result<Record<F>, StoreError> {
        let url = format!("{}/{}", self.table_url(table), record_id);
        let response = self.http.get(url).bearer_auth(&self.api_key).send().await?;
        let record = Self::check(response).await?.json().await?;
        Ok(record)
    }

    pub async fn create_record<F: DeserializeOwned>(
        &self,
        table: &str,
        fields: serde_json::Value,
    ) -> Result<Record<F>, StoreError> {
        let body = serde_json::json!({ "fields": fields });
        let response = self
            .http
            .post(self.table_url(table))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let record = Self::check(response).await?.json().await?;
        Ok(record)
    }

    pub async fn patch_record(
        &self,
        table: &str,
        record_id: &str,
        fields: serde_json::Value,
    ) -> Result<(), StoreError> {
        let body = serde_json::json!({ "fields": fields });
        let url = format!("{}/{}", self.table_url(table), record_id);
        let response = self
            .http
            .patch(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Patch one chunk of records in a single request. Callers keep chunks
    /// within `write_batch_size`.
    pub async fn patch_chunk(&self, table: &str, chunk: &[RecordPatch]) -> Result<(), StoreError> {
        let body = PatchBody { records: chunk };
        let response = self
            .http
            .patch(self.table_url(table))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Patch records in rate-limited chunks. A failed chunk is logged and
    /// skipped rather than aborting the rest.
    pub async fn patch_records(&self, table: &str, patches: &[RecordPatch]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut chunks = patches.chunks(self.write_batch_size).peekable();
        while let Some(chunk) = chunks.next() {
            match self.patch_chunk(table, chunk).await {
                Ok(()) => outcome.applied += chunk.len(),
                Err(e) => {
                    warn!(table, error = %e, count = chunk.len(), "batch update chunk failed, skipping");
                    outcome.failed += chunk.len();
                }
            }
            if chunks.peek().is_some() {
                sleep(self.request_delay).await;
            }
        }
        outcome
    }

    /// Upsert one chunk keyed on `merge_on`.
    pub async fn upsert_chunk(
        &self,
        table: &str,
        merge_on: &str,
        records: Vec<UpsertRecord>,
    ) -> Result<UpsertPage, StoreError> {
        let body = UpsertBody {
            perform_upsert: UpsertSpec {
                fields_to_merge_on: [merge_on],
            },
            records,
        };
        let response = self
            .http
            .patch(self.table_url(table))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let page = Self::check(response).await?.json().await?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs_cover_all_options() {
        let query = ListQuery::new()
            .filter(r#"{Status} = "pending""#)
            .max_records(100)
            .fields(&["Status", "Email"])
            .sort_desc("CreatedAt");

        let pairs = query.query_pairs();
        assert!(pairs.contains(&(
            "filterByFormula".to_string(),
            r#"{Status} = "pending""#.to_string()
        )));
        assert!(pairs.contains(&("maxRecords".to_string(), "100".to_string())));
        assert!(pairs.contains(&("fields[]".to_string(), "Status".to_string())));
        assert!(pairs.contains(&("fields[]".to_string(), "Email".to_string())));
        assert!(pairs.contains(&("sort[0][field]".to_string(), "CreatedAt".to_string())));
        assert!(pairs.contains(&("sort[0][direction]".to_string(), "desc".to_string())));
    }

    #[test]
    fn test_empty_query_has_no_pairs() {
        assert!(ListQuery::new().query_pairs().is_empty());
    }

    #[test]
    fn test_upsert_body_wire_shape() {
        let body = UpsertBody {
            perform_upsert: UpsertSpec {
                fields_to_merge_on: ["Key"],
            },
            records: vec![UpsertRecord {
                fields: serde_json::json!({ "Key": "job:a@example.com" }),
            }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["performUpsert"]["fieldsToMergeOn"][0], "Key");
        assert_eq!(value["records"][0]["fields"]["Key"], "job:a@example.com");
    }
}
