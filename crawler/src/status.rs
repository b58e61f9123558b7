//! Aggregate reports over stored crawl results.

use crate::store::{NodeStore, StoreError};
use std::fmt;

/// Counts over everything the store knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub total_count: usize,
    pub distinct_ip_count: usize,
}

impl StatusReport {
    /// Query the store for a fresh report.
    pub async fn create<S: NodeStore>(store: &S) -> Result<Self, StoreError> {
        let total_count = store.count_nodes().await?;
        let distinct_ip_count = store.count_distinct_ips().await?;
        Ok(StatusReport {
            total_count,
            distinct_ip_count,
        })
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total: {}, distinct IPs: {}",
            self.total_count, self.distinct_ip_count
        )
    }
}

/// The most common clients among handshaked nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientsReport {
    /// Client names with their node counts, most common first.
    pub clients: Vec<(String, usize)>,
}

impl ClientsReport {
    /// Query the store for the `limit` most common clients.
    pub async fn create<S: NodeStore>(store: &S, limit: usize) -> Result<Self, StoreError> {
        let clients = store.count_clients(limit).await?;
        Ok(ClientsReport { clients })
    }
}

impl fmt::Display for ClientsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clients.is_empty() {
            return write!(f, "clients: none");
        }
        write!(f, "clients:")?;
        for (name, count) in &self.clients {
            write!(f, "\n  {name}: {count}")?;
        }
        Ok(())
    }
}
