//! Conflict detection records and resolution.

use crate::codec;
use crate::error::CodecResult;
use crate::types::{ConflictId, ItemType, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A divergence between the local and server versions of one entity.
///
/// Created when the remote rejects a write because it holds a newer
/// version; kept in conflict storage until resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict ID.
    pub id: ConflictId,
    /// Domain entity ID.
    pub item_id: String,
    /// Domain entity kind.
    pub item_type: ItemType,
    /// Full local snapshot.
    pub local_data: Payload,
    /// Full server snapshot.
    pub server_data: Payload,
    /// When the local version was written.
    pub local_timestamp: DateTime<Utc>,
    /// When the server version was written.
    pub server_timestamp: DateTime<Utc>,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

impl SyncConflict {
    /// Creates a new conflict.
    pub fn new(
        item_id: impl Into<String>,
        item_type: ItemType,
        local_data: Payload,
        server_data: Payload,
        local_timestamp: DateTime<Utc>,
        server_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConflictId::generate(),
            item_id: item_id.into(),
            item_type,
            local_data,
            server_data,
            local_timestamp,
            server_timestamp,
            detected_at: Utc::now(),
        }
    }

    /// Returns true if the server version was written strictly later.
    pub fn server_is_newer(&self) -> bool {
        self.server_timestamp > self.local_timestamp
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        codec::encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        codec::decode(bytes)
    }
}

/// Which version wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep local version.
    UseLocal,
    /// Accept server version.
    UseServer,
    /// Field-level merge. Reserved; no built-in policy produces it.
    Merge,
}

impl Resolution {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::UseLocal => "use_local",
            Resolution::UseServer => "use_server",
            Resolution::Merge => "merge",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// The resolved conflict.
    pub conflict_id: ConflictId,
    /// Which version won.
    pub resolution: Resolution,
    /// The payload to write back.
    pub merged_data: Payload,
}

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Newer timestamp wins; ties go to the local version.
    #[default]
    LastWriteWins,
    /// Server always wins.
    ServerWins,
    /// Client always wins.
    ClientWins,
}

impl ConflictPolicy {
    /// Resolves a conflict according to this policy.
    ///
    /// Pure: the same conflict always yields the same resolution.
    pub fn resolve(&self, conflict: &SyncConflict) -> ConflictResolution {
        let resolution = match self {
            ConflictPolicy::LastWriteWins => {
                if conflict.server_is_newer() {
                    Resolution::UseServer
                } else {
                    Resolution::UseLocal
                }
            }
            ConflictPolicy::ServerWins => Resolution::UseServer,
            ConflictPolicy::ClientWins => Resolution::UseLocal,
        };

        let merged_data = match resolution {
            Resolution::UseServer => conflict.server_data.clone(),
            Resolution::UseLocal | Resolution::Merge => conflict.local_data.clone(),
        };

        ConflictResolution {
            conflict_id: conflict.id.clone(),
            resolution,
            merged_data,
        }
    }

    /// Returns the policy name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::LastWriteWins => "last_write_wins",
            ConflictPolicy::ServerWins => "server_wins",
            ConflictPolicy::ClientWins => "client_wins",
        }
    }
}

/// Resolves a conflict with last-writer-wins.
///
/// The server version wins only when its timestamp is strictly later
/// than the local one; equal timestamps keep the local version.
pub fn resolve(conflict: &SyncConflict) -> ConflictResolution {
    ConflictPolicy::LastWriteWins.resolve(conflict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn payload(status: &str) -> Payload {
        let mut p = Payload::new();
        p.insert("status".into(), json!(status));
        p
    }

    fn conflict(local_offset_secs: i64, server_offset_secs: i64) -> SyncConflict {
        let base = Utc::now();
        SyncConflict::new(
            "req-1",
            ItemType::Request,
            payload("pending"),
            payload("approved"),
            base + Duration::seconds(local_offset_secs),
            base + Duration::seconds(server_offset_secs),
        )
    }

    #[test]
    fn newer_server_wins() {
        let c = conflict(0, 3600);
        let r = resolve(&c);
        assert_eq!(r.resolution, Resolution::UseServer);
        assert_eq!(r.merged_data, c.server_data);
        assert_eq!(r.conflict_id, c.id);
    }

    #[test]
    fn newer_local_wins() {
        let c = conflict(60, 0);
        let r = resolve(&c);
        assert_eq!(r.resolution, Resolution::UseLocal);
        assert_eq!(r.merged_data, c.local_data);
    }

    #[test]
    fn tie_keeps_local() {
        let c = conflict(0, 0);
        assert_eq!(resolve(&c).resolution, Resolution::UseLocal);
    }

    #[test]
    fn fixed_policies() {
        let c = conflict(3600, 0);
        assert_eq!(
            ConflictPolicy::ServerWins.resolve(&c).resolution,
            Resolution::UseServer
        );

        let c = conflict(0, 3600);
        assert_eq!(
            ConflictPolicy::ClientWins.resolve(&c).resolution,
            Resolution::UseLocal
        );
    }

    #[test]
    fn resolution_wire_names() {
        assert_eq!(
            serde_json::to_string(&Resolution::UseServer).unwrap(),
            "\"use_server\""
        );
        assert_eq!(Resolution::UseLocal.to_string(), "use_local");
        assert_eq!(Resolution::Merge.as_str(), "merge");
    }

    #[test]
    fn conflict_survives_encoding() {
        let c = conflict(0, 10);
        let decoded = SyncConflict::decode(&c.encode().unwrap()).unwrap();
        assert_eq!(decoded, c);
    }
}
