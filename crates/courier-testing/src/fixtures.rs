//! Builders for domain objects used across the test suites.

use chrono::{DateTime, Utc};
use courier_core::models::{ClaimEnvelope, CorrelationId, TaskId, WebhookRecord};

/// A claim envelope with plausible defaults and the given callback URL.
pub fn claim_envelope(reference_id: &str, webhook_url: Option<&str>) -> ClaimEnvelope {
    ClaimEnvelope {
        reference_id: reference_id.to_string(),
        employee_number: "EN-1001".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        individual_name: None,
        crd_number: Some("1234567".to_string()),
        organization_crd: None,
        organization_name: Some("Analytical Engines LLC".to_string()),
        webhook_url: webhook_url.map(str::to_string),
        extra: serde_json::Map::new(),
    }
}

/// A pending webhook record created `created_at`.
pub fn pending_record(
    reference_id: &str,
    webhook_url: &str,
    max_attempts: u32,
    created_at: DateTime<Utc>,
) -> WebhookRecord {
    WebhookRecord::pending(
        reference_id,
        TaskId::new(),
        webhook_url,
        CorrelationId::new(),
        max_attempts,
        created_at,
    )
}
