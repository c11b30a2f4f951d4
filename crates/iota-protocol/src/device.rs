use serde::{Deserialize, Serialize};

/// Device reference as provisioned in the agent's registry.
///
/// The binding only reads it: `id` becomes a routing-key segment and
/// `service`/`subservice` select the API key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Device identifier, unique within its service.
    pub id: String,
    /// Tenant (FIWARE service) the device belongs to.
    pub service: String,
    /// Service path (FIWARE subservice), e.g. `/gardens`.
    pub subservice: String,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        subservice: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            subservice: subservice.into(),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}{})", self.id, self.service, self.subservice)
    }
}
