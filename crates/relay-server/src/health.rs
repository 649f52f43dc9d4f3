//! `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

use crate::hub::RegistryStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the hub is running, `"stopping"` otherwise.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered clients.
    pub connections: usize,
    /// Roles with at least one connected member.
    pub roles: usize,
    /// Organizations with at least one connected member.
    pub organizations: usize,
}

/// Build a health response from hub stats, or `None` if the hub is gone.
pub fn health_check(start_time: Instant, stats: Option<RegistryStats>) -> HealthResponse {
    let (status, stats) = match stats {
        Some(stats) => ("ok", stats),
        None => ("stopping", RegistryStats::default()),
    };
    HealthResponse {
        status,
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.clients,
        roles: stats.roles,
        organizations: stats.organizations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_hub_is_ok() {
        let stats = RegistryStats {
            clients: 5,
            roles: 2,
            organizations: 1,
        };
        let resp = health_check(Instant::now(), Some(stats));
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.connections, 5);
        assert_eq!(resp.roles, 2);
        assert_eq!(resp.organizations, 1);
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn stopped_hub_reports_stopping() {
        let resp = health_check(Instant::now(), None);
        assert_eq!(resp.status, "stopping");
        assert_eq!(resp.connections, 0);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, None).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), Some(RegistryStats::default()));
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
        assert!(parsed["organizations"].is_number());
    }
}
