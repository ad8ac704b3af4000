// ── Machine domain type ──

use serde::{Deserialize, Serialize};

use machdash_api::MachineDto;

/// A monitored machine. Owns zero or more metrics; deleting a machine
/// from the cache cascades to its cached metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    /// Backend-assigned string id (e.g. `"m-001"`).
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    /// Free-form status string reported by the backend.
    pub status: String,
}

impl From<MachineDto> for Machine {
    fn from(dto: MachineDto) -> Self {
        Self {
            id: dto.machine_id,
            name: dto.name,
            location: dto.location,
            status: dto.status,
        }
    }
}
