use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::models::job::TargetPlan;

use super::client::{ListQuery, Record, RowStoreClient};
use super::{escape_formula, RecipientDirectory, StoreError};

pub const CUSTOMERS_TABLE: &str = "Customers";

#[derive(Debug, Deserialize)]
struct CustomerFields {
    #[serde(rename = "Email", default)]
    email: String,
}

fn recipients_formula(target: TargetPlan) -> String {
    match target {
        TargetPlan::All => "{Unsubscribed} = FALSE()".to_string(),
        plan => format!(r#"AND({{Unsubscribed}} = FALSE(), {{Plan}} = "{}")"#, plan),
    }
}

#[async_trait]
impl RecipientDirectory for RowStoreClient {
    async fn list_recipients(&self, target: TargetPlan) -> Result<Vec<String>, StoreError> {
        let records: Vec<Record<CustomerFields>> = self
            .list(
                CUSTOMERS_TABLE,
                &ListQuery::new()
                    .filter(recipients_formula(target))
                    .fields(&["Email"]),
            )
            .await?;

        let mut emails: Vec<String> = records
            .into_iter()
            .map(|record| record.fields.email.trim().to_lowercase())
            .filter(|email| !email.is_empty() && email.contains('@'))
            .collect();
        emails.sort();
        emails.dedup();
        Ok(emails)
    }

    async fn mark_unsubscribed(&self, email: &str) -> Result<bool, StoreError> {
        let normalized = email.trim().to_lowercase();
        let formula = format!(r#"LOWER({{Email}}) = "{}""#, escape_formula(&normalized));
        let records: Vec<Record<CustomerFields>> = self
            .list(
                CUSTOMERS_TABLE,
                &ListQuery::new().filter(formula).max_records(1),
            )
            .await?;

        match records.first() {
            Some(record) => {
                self.patch_record(CUSTOMERS_TABLE, &record.id, json!({ "Unsubscribed": true }))
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
