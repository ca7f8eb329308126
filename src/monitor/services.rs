//! systemd unit probing

use std::process::Stdio;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::process::Command;

use crate::config::ServiceConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Active,
    Inactive,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceState {
    pub name: String,
    pub label: String,
    pub status: ServiceStatus,
}

/// Probe every unit concurrently, preserving configured order
pub async fn probe_all(services: &[ServiceConfig]) -> Vec<ServiceState> {
    join_all(services.iter().map(|svc| async move {
        ServiceState {
            name: svc.name.clone(),
            label: svc.label.clone(),
            status: probe("systemctl", &svc.name).await,
        }
    }))
    .await
}

async fn probe(program: &str, unit: &str) -> ServiceStatus {
    let mut cmd = Command::new(program);
    cmd.args(["is-active", unit])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await {
        Ok(Ok(status)) if status.success() => ServiceStatus::Active,
        Ok(Ok(_)) => ServiceStatus::Inactive,
        Ok(Err(e)) => {
            tracing::debug!("Could not run {} for {}: {}", program, unit, e);
            ServiceStatus::Unknown
        }
        Err(_) => {
            tracing::warn!("Probe of {} timed out", unit);
            ServiceStatus::Unknown
        }
    }
}
