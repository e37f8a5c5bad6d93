//! Domain entities carried through the sync queue.
//!
//! The engine itself never interprets these; it only needs the
//! [`Syncable`] view to build queue items.

use crate::error::{CodecError, CodecResult};
use crate::types::{ItemType, Payload};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An entity that can be queued for sync.
pub trait Syncable {
    /// Domain identifier.
    fn item_id(&self) -> &str;

    /// Entity kind, used to route the item to its sync pass.
    fn item_type(&self) -> ItemType;

    /// Last local modification time.
    fn updated_at(&self) -> DateTime<Utc>;

    /// Flattens the entity into a payload snapshot.
    fn to_payload(&self) -> CodecResult<Payload>;
}

/// Converts a serializable record into a payload map.
fn payload_of<T: Serialize>(value: &T) -> CodecResult<Payload> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(_) => Err(CodecError::invalid_structure("entity must serialize to an object")),
        Err(e) => Err(CodecError::encoding_failed(e.to_string())),
    }
}

/// Rebuilds a record from a payload map.
fn from_payload<T: DeserializeOwned>(payload: &Payload) -> CodecResult<T> {
    let object: serde_json::Map<String, serde_json::Value> =
        payload.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Approval status of an OD request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OdStatus {
    /// Awaiting a decision.
    #[default]
    Pending,
    /// Approved by staff.
    Approved,
    /// Rejected by staff.
    Rejected,
}

impl OdStatus {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OdStatus::Pending => "pending",
            OdStatus::Approved => "approved",
            OdStatus::Rejected => "rejected",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(OdStatus::Pending),
            "approved" => Some(OdStatus::Approved),
            "rejected" => Some(OdStatus::Rejected),
            _ => None,
        }
    }

    /// Returns true once a decision has been made.
    pub fn is_decided(&self) -> bool {
        !matches!(self, OdStatus::Pending)
    }
}

impl fmt::Display for OdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An on-duty request raised by a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdRequest {
    /// Request ID.
    pub id: String,
    /// Owning student.
    pub student_id: String,
    /// Student register number.
    pub register_number: String,
    /// Student display name.
    pub student_name: String,
    /// Day the request covers.
    pub date: NaiveDate,
    /// Class periods covered.
    pub periods: Vec<u8>,
    /// Free-text reason.
    pub reason: String,
    /// Optional supporting document.
    pub attachment_url: Option<String>,
    /// Approval status.
    pub status: OdStatus,
    /// Staff member who decided the request.
    pub approved_by_id: Option<String>,
    /// When the decision was made.
    pub approved_at: Option<DateTime<Utc>>,
    /// Reason given for a rejection.
    pub rejection_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl OdRequest {
    /// Creates a pending request stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        student_id: impl Into<String>,
        register_number: impl Into<String>,
        student_name: impl Into<String>,
        date: NaiveDate,
        periods: Vec<u8>,
        reason: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            student_id: student_id.into(),
            register_number: register_number.into(),
            student_name: student_name.into(),
            date,
            periods,
            reason: reason.into(),
            attachment_url: None,
            status: OdStatus::Pending,
            approved_by_id: None,
            approved_at: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the attachment URL.
    pub fn with_attachment(mut self, url: impl Into<String>) -> Self {
        self.attachment_url = Some(url.into());
        self
    }

    /// Rebuilds a request from a payload snapshot.
    pub fn from_payload(payload: &Payload) -> CodecResult<Self> {
        from_payload(payload)
    }
}

impl Syncable for OdRequest {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn item_type(&self) -> ItemType {
        ItemType::Request
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_payload(&self) -> CodecResult<Payload> {
        payload_of(self)
    }
}

/// Role of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Raises OD requests.
    #[default]
    Student,
    /// Approves or rejects requests.
    Staff,
    /// Department administrator.
    Admin,
    /// Full access.
    Superuser,
}

impl UserRole {
    /// Returns true if the role may decide OD requests.
    pub fn can_approve(&self) -> bool {
        !matches!(self, UserRole::Student)
    }
}

/// A user's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User ID.
    pub id: String,
    /// Display name.
    pub full_name: String,
    /// Contact email.
    pub email: String,
    /// Account role.
    pub role: UserRole,
    /// Department, if any.
    pub department: Option<String>,
    /// Register number for students.
    pub register_number: Option<String>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Creates a profile stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        full_name: impl Into<String>,
        email: impl Into<String>,
        role: UserRole,
    ) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.into(),
            email: email.into(),
            role,
            department: None,
            register_number: None,
            updated_at: Utc::now(),
        }
    }

    /// Rebuilds a profile from a payload snapshot.
    pub fn from_payload(payload: &Payload) -> CodecResult<Self> {
        from_payload(payload)
    }
}

impl Syncable for UserProfile {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn item_type(&self) -> ItemType {
        ItemType::Profile
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn to_payload(&self) -> CodecResult<Payload> {
        payload_of(self)
    }
}
