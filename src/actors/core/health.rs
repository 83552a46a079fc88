use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Health Types
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded(_) => "degraded",
            HealthStatus::Unhealthy(_) => "unhealthy",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded(reason) | HealthStatus::Unhealthy(reason) => Some(reason),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

impl Serialize for HealthStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Health information for a component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        let details = status.reason().map(str::to_string);
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            details,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_as_label() {
        let json = serde_json::to_string(&HealthStatus::Degraded("slow".into())).unwrap();
        assert_eq!(json, "\"degraded\"");
    }

    #[test]
    fn test_component_health_carries_reason() {
        let health = ComponentHealth::new("redis", HealthStatus::Unhealthy("down".into()));
        assert_eq!(health.details.as_deref(), Some("down"));

        let health = ComponentHealth::new("redis", HealthStatus::Healthy).with_details("ok");
        assert_eq!(health.details.as_deref(), Some("ok"));
    }
}
