//! Materialized instance identity and state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::refresh_key::RefreshKeyValue;
use crate::cache::StateKey;
use crate::model::LocationKind;
use crate::semantic::PreAggregationId;

/// Identity of one materialized dataset: a pre-aggregation, or one
/// partition of a partitioned rollup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub cube: String,
    pub pre_aggregation: String,
    pub partition: Option<String>,
}

impl InstanceKey {
    pub fn new(
        cube: impl Into<String>,
        pre_aggregation: impl Into<String>,
        partition: Option<String>,
    ) -> Self {
        Self {
            cube: cube.into(),
            pre_aggregation: pre_aggregation.into(),
            partition,
        }
    }

    pub fn for_pre_aggregation(id: &PreAggregationId, partition: Option<String>) -> Self {
        Self::new(&id.cube, &id.name, partition)
    }

    pub fn pre_aggregation_id(&self) -> PreAggregationId {
        PreAggregationId::new(&self.cube, &self.pre_aggregation)
    }

    /// Key of the persisted state record.
    pub fn state_key(&self) -> String {
        StateKey::instance(&self.cube, &self.pre_aggregation, self.partition.as_deref())
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.cube, self.pre_aggregation)?;
        if let Some(partition) = &self.partition {
            write!(f, ":{}", partition)?;
        }
        Ok(())
    }
}

/// Physical location of a materialized table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub kind: LocationKind,
    pub table: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.table)
    }
}

/// A fully built, visible dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedInstance {
    pub key: InstanceKey,
    /// Refresh key observed when the build started; `None` when the probe
    /// failed, so the next evaluation always sees it as stale.
    pub refresh_key: Option<RefreshKeyValue>,
    pub built_at: DateTime<Utc>,
    pub location: Location,
    pub structure_version: String,
}

/// Lifecycle state of an instance identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Absent,
    Building,
    Ready,
    Stale,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Absent => "absent",
            InstanceStatus::Building => "building",
            InstanceStatus::Ready => "ready",
            InstanceStatus::Stale => "stale",
        };
        f.write_str(s)
    }
}

/// Persisted form of an instance and its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance: MaterializedInstance,
    pub status: InstanceStatus,
}
