//! Core domain models and strongly-typed identifiers.
//!
//! Defines webhook records, dead-letter entries, task records, and newtype
//! ID wrappers for compile-time type safety. All records serialize to JSON
//! with named fields; nothing in the core round-trips through an untyped
//! map.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Retention for records that reached `delivered`.
pub const TTL_DELIVERED: Duration = Duration::from_secs(30 * 60);

/// Retention for records in any non-delivered state, and for task records.
pub const TTL_ACTIVE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Retention for dead-letter entries.
pub const TTL_DEAD_LETTER: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Strongly-typed compute task identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. The task id is
/// returned to the caller at ingress and follows the claim through compute
/// and delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Creates a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Server-generated trace token threaded through logs, metrics, and
/// outbound headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Creates a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite webhook identifier: `<reference_id>_<task_id>`.
///
/// One webhook record exists per compute task that carries a callback URL,
/// so the pair is unique and lets clients correlate by their own reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookId(pub String);

impl WebhookId {
    /// Builds the composite id from its parts.
    pub fn new(reference_id: &str, task_id: TaskId) -> Self {
        Self(format!("{reference_id}_{task_id}"))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WebhookId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Webhook delivery lifecycle status.
///
/// Records progress through these states; `delivered` and `failed` are
/// terminal and freeze the record:
///
/// ```text
/// pending -> in_progress -> delivered
///                       |-> retrying -> in_progress
///                       `-> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    /// Record created, delivery not yet attempted.
    Pending,
    /// A delivery attempt is in flight.
    InProgress,
    /// A retriable failure occurred; a delayed attempt is scheduled.
    Retrying,
    /// A 2xx response was observed. Terminal.
    Delivered,
    /// Permanently abandoned. Terminal.
    Failed,
}

impl WebhookStatus {
    /// Whether this status permits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::InProgress | Self::Failed),
            Self::InProgress => {
                matches!(next, Self::Retrying | Self::Delivered | Self::Failed)
            },
            Self::Retrying => matches!(next, Self::InProgress | Self::Failed),
            Self::Delivered | Self::Failed => false,
        }
    }

    /// Parses the snake_case form used in query parameters.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "retrying" => Some(Self::Retrying),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Retrying => write!(f, "retrying"),
            Self::Delivered => write!(f, "delivered"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The primary entity: one webhook delivery obligation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRecord {
    /// Composite identifier, `<reference_id>_<task_id>`.
    pub webhook_id: WebhookId,
    /// Opaque client correlation token.
    pub reference_id: String,
    /// Compute task that produced (or will produce) the payload.
    pub task_id: TaskId,
    /// Destination callback URL.
    pub webhook_url: String,
    /// Current lifecycle status.
    pub status: WebhookStatus,
    /// Delivery attempts made so far.
    pub attempts: u32,
    /// Ceiling on delivery attempts.
    pub max_attempts: u32,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the most recent attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Set when the record reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last HTTP status code observed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    /// Short class label of the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Trace token propagated to outbound headers.
    pub correlation_id: CorrelationId,
    /// Stable hash of the outbound payload, for receiver-side idempotency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_digest: Option<String>,
    /// The outbound payload. Retained only for replay; stripped from API
    /// projections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl WebhookRecord {
    /// Creates a fresh `pending` record.
    pub fn pending(
        reference_id: impl Into<String>,
        task_id: TaskId,
        webhook_url: impl Into<String>,
        correlation_id: CorrelationId,
        max_attempts: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let reference_id = reference_id.into();
        Self {
            webhook_id: WebhookId::new(&reference_id, task_id),
            reference_id,
            task_id,
            webhook_url: webhook_url.into(),
            status: WebhookStatus::Pending,
            attempts: 0,
            max_attempts,
            created_at,
            last_attempt_at: None,
            completed_at: None,
            response_code: None,
            last_error: None,
            correlation_id,
            payload_digest: None,
            payload: None,
        }
    }

    /// Retention duration for the record in its current status.
    pub fn ttl(&self) -> Duration {
        match self.status {
            WebhookStatus::Delivered => TTL_DELIVERED,
            _ => TTL_ACTIVE,
        }
    }

    /// Copy of the record with the payload stripped, for API projections.
    pub fn without_payload(&self) -> Self {
        Self { payload: None, ..self.clone() }
    }
}

/// Persisted record of a permanently failed delivery.
///
/// Retained for operator inspection and manual replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The webhook this entry belongs to.
    pub webhook_id: WebhookId,
    /// Client correlation token, duplicated here so the entry is
    /// self-contained.
    pub reference_id: String,
    /// Destination that could not be reached.
    pub webhook_url: String,
    /// The payload that failed to deliver.
    pub payload: serde_json::Value,
    /// Failure class label (`client_4xx_permanent`, `timeout`, ...).
    pub error_class: String,
    /// Human-readable detail of the final failure.
    pub error_detail: String,
    /// Delivery attempts made before giving up.
    pub attempts: u32,
    /// Trace token of the final attempt.
    pub correlation_id: CorrelationId,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

/// Compute task lifecycle, exposed through `/task-status`.
///
/// Uses the upper-case vocabulary clients already depend on, distinct from
/// the snake_case webhook statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    /// Accepted and waiting for a compute worker.
    Queued,
    /// A compute worker is executing the claim.
    Processing,
    /// Compute finished and produced a result.
    Completed,
    /// Compute failed permanently.
    Failed,
    /// A transient compute failure occurred; a delayed retry is scheduled.
    Retrying,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Retrying => write!(f, "RETRYING"),
        }
    }
}

/// Status record for one compute task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// The task this record tracks.
    pub task_id: TaskId,
    /// Client correlation token from the claim.
    pub reference_id: String,
    /// Current task status.
    pub status: TaskStatus,
    /// Compute result, present once `COMPLETED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure description, present once `FAILED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Creates a fresh `QUEUED` record.
    pub fn queued(
        task_id: TaskId,
        reference_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            reference_id: reference_id.into(),
            status: TaskStatus::Queued,
            result: None,
            error: None,
            created_at,
            updated_at: created_at,
        }
    }
}

/// Processing mode requested by the client.
///
/// Opaque to the core; forwarded to the compute function, which decides
/// which reviews each mode includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Skips all reviews.
    Basic,
    /// Includes disciplinary and arbitration reviews.
    Extended,
    /// Includes all reviews.
    Complete,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Extended => write!(f, "extended"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Validated claim envelope accepted at ingress.
///
/// Unknown fields are preserved in `extra` and forwarded to the compute
/// function untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimEnvelope {
    /// Opaque client correlation token.
    pub reference_id: String,
    /// Employee the claim concerns.
    pub employee_number: String,
    /// Claimant first name.
    pub first_name: String,
    /// Claimant last name.
    pub last_name: String,
    /// Full name override; assembled from first/last when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub individual_name: Option<String>,
    /// CRD number of the individual, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crd_number: Option<String>,
    /// CRD number of the organization, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_crd: Option<String>,
    /// Organization name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    /// Callback URL for asynchronous result delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Additional claim fields, forwarded verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ClaimEnvelope {
    /// The individual name, assembling it from first/last when no explicit
    /// override was supplied.
    pub fn individual_name(&self) -> String {
        match &self.individual_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("{} {}", self.first_name.trim(), self.last_name.trim())
                .trim()
                .to_string(),
        }
    }
}

/// Stable hex SHA-256 digest of an outbound payload.
pub fn payload_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_id_is_reference_and_task() {
        let task_id = TaskId::new();
        let id = WebhookId::new("REF1", task_id);
        assert_eq!(id.as_str(), format!("REF1_{task_id}"));
    }

    #[test]
    fn terminal_statuses_reject_all_transitions() {
        for terminal in [WebhookStatus::Delivered, WebhookStatus::Failed] {
            for next in [
                WebhookStatus::Pending,
                WebhookStatus::InProgress,
                WebhookStatus::Retrying,
                WebhookStatus::Delivered,
                WebhookStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next} must be illegal");
            }
        }
    }

    #[test]
    fn legal_transitions_follow_state_machine() {
        use WebhookStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Retrying));
        assert!(InProgress.can_transition_to(Delivered));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Retrying.can_transition_to(InProgress));
        assert!(!Delivered.can_transition_to(Retrying));
        assert!(!Pending.can_transition_to(Delivered));
    }

    #[test]
    fn ttl_depends_on_status() {
        let mut record = WebhookRecord::pending(
            "REF1",
            TaskId::new(),
            "https://ok.example.com/hook",
            CorrelationId::new(),
            3,
            Utc::now(),
        );
        assert_eq!(record.ttl(), TTL_ACTIVE);

        record.status = WebhookStatus::Delivered;
        assert_eq!(record.ttl(), TTL_DELIVERED);

        record.status = WebhookStatus::Failed;
        assert_eq!(record.ttl(), TTL_ACTIVE);
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut record = WebhookRecord::pending(
            "REF1",
            TaskId::new(),
            "https://ok.example.com/hook",
            CorrelationId::new(),
            3,
            Utc::now(),
        );
        record.payload = Some(serde_json::json!({"claim": "data"}));
        record.payload_digest = Some(payload_digest(b"{\"claim\":\"data\"}"));

        let json = serde_json::to_string(&record).unwrap();
        let parsed: WebhookRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn without_payload_strips_only_payload() {
        let mut record = WebhookRecord::pending(
            "REF1",
            TaskId::new(),
            "https://ok.example.com/hook",
            CorrelationId::new(),
            3,
            Utc::now(),
        );
        record.payload = Some(serde_json::json!({"secret": true}));
        record.payload_digest = Some("abc".into());

        let stripped = record.without_payload();
        assert!(stripped.payload.is_none());
        assert_eq!(stripped.payload_digest.as_deref(), Some("abc"));
        assert_eq!(stripped.webhook_id, record.webhook_id);
    }

    #[test]
    fn task_status_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&TaskStatus::Queued).unwrap(), "\"QUEUED\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Retrying).unwrap(), "\"RETRYING\"");
    }

    #[test]
    fn claim_envelope_preserves_extra_fields() {
        let body = serde_json::json!({
            "reference_id": "REF1",
            "employee_number": "EN-1001",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "custom_field": "kept"
        });
        let envelope: ClaimEnvelope = serde_json::from_value(body).unwrap();
        assert_eq!(envelope.extra.get("custom_field").unwrap(), "kept");
        assert_eq!(envelope.individual_name(), "Ada Lovelace");

        let back = serde_json::to_value(&envelope).unwrap();
        assert_eq!(back.get("custom_field").unwrap(), "kept");
    }

    #[test]
    fn payload_digest_is_stable_hex() {
        let a = payload_digest(b"payload");
        let b = payload_digest(b"payload");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
