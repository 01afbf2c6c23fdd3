use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Result, WharfError};
use crate::models::project::validate_port;
use crate::models::{PortAllocation, PortRange, PortStatistics, Project, ProjectFilter};
use crate::services::registry::ProjectRegistry;

/// Hands out host ports to projects.
///
/// The registry is the source of truth: a port is taken when a port-holding
/// project records it. The allocator only remembers reservations that have
/// been handed out but not yet written to a record.
pub struct PortAllocator {
    registry: Arc<dyn ProjectRegistry>,
    pending: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(registry: Arc<dyn ProjectRegistry>) -> Self {
        Self {
            registry,
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Claim `preferred` if it is free, otherwise the lowest free port in
    /// `range`.
    pub async fn reserve(&self, preferred: Option<u16>, range: PortRange) -> Result<u16> {
        range.validate()?;
        if let Some(port) = preferred {
            validate_port(port)?;
        }

        let mut pending = self.pending.lock().await;
        let taken = self.registry_ports().await?;
        let is_free =
            |port: u16, pending: &HashSet<u16>| !pending.contains(&port) && !taken.contains_key(&port);

        if let Some(port) = preferred {
            if is_free(port, &pending) {
                pending.insert(port);
                tracing::debug!(port, "reserved preferred port");
                return Ok(port);
            }
            tracing::debug!(port, "preferred port taken, scanning range");
        }

        let port = range
            .iter()
            .find(|&p| is_free(p, &pending))
            .ok_or(WharfError::PortExhaustion {
                start: range.start,
                end: range.end,
            })?;
        pending.insert(port);
        tracing::debug!(port, "reserved port from range");
        Ok(port)
    }

    /// Claim exactly `port` or fail with a conflict.
    pub async fn claim(&self, port: u16) -> Result<()> {
        validate_port(port)?;
        let mut pending = self.pending.lock().await;
        let taken = self.registry_ports().await?;
        if let Some(owner) = taken.get(&port) {
            return Err(WharfError::Conflict(format!(
                "port {port} is already used by project '{}'",
                owner.name
            )));
        }
        if !pending.insert(port) {
            return Err(WharfError::Conflict(format!(
                "port {port} is being claimed by another deployment"
            )));
        }
        Ok(())
    }

    /// The registry now records `port` on a project; drop the reservation.
    pub async fn commit(&self, port: u16) {
        self.pending.lock().await.remove(&port);
    }

    /// Give back a reservation. Releasing a free port is a no-op.
    pub async fn release(&self, port: u16) {
        if self.pending.lock().await.remove(&port) {
            tracing::debug!(port, "released port reservation");
        }
    }

    pub async fn is_in_use(&self, port: u16) -> Result<bool> {
        let pending = self.pending.lock().await;
        if pending.contains(&port) {
            return Ok(true);
        }
        Ok(self.registry_ports().await?.contains_key(&port))
    }

    /// Up to `count` free ports in `[min, max]`, ascending. Nothing is
    /// reserved; callers must still `reserve`.
    pub async fn find_available(&self, min: u16, max: u16, count: usize) -> Result<Vec<u16>> {
        let range = PortRange::new(min, max)?;
        let pending = self.pending.lock().await;
        let taken = self.registry_ports().await?;
        Ok(range
            .iter()
            .filter(|p| !pending.contains(p) && !taken.contains_key(p))
            .take(count)
            .collect())
    }

    pub async fn statistics(&self, range: PortRange) -> Result<PortStatistics> {
        range.validate()?;
        let pending = self.pending.lock().await;
        let taken = self.registry_ports().await?;
        let in_use = range
            .iter()
            .filter(|p| pending.contains(p) || taken.contains_key(p))
            .count();
        let allocations = taken
            .into_iter()
            .map(|(port, project)| PortAllocation {
                port,
                project_id: project.id,
                project_name: project.name,
            })
            .collect();
        Ok(PortStatistics {
            range_start: range.start,
            range_end: range.end,
            total: range.len(),
            in_use,
            available: range.len() - in_use,
            allocations,
        })
    }

    async fn registry_ports(&self) -> Result<BTreeMap<u16, Project>> {
        let holders = self.registry.list(&ProjectFilter::port_holders()).await?;
        Ok(holders.into_iter().map(|p| (p.port, p)).collect())
    }
}
