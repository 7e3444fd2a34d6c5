use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// Per-tenant engines, keyed by the database name of the connection. Each
/// tenant has its own WAL file and compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    clock: Arc<dyn Clock>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self::with_clock(data_dir, compact_threshold, Arc::new(SystemClock))
    }

    pub fn with_clock(data_dir: PathBuf, compact_threshold: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            clock,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        if tenant.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        let file_name = wal_file_name(tenant);
        if file_name.len() > MAX_FILE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Two connections may race to open the same tenant; the entry API
        // makes sure only one engine (and one WAL writer) survives.
        let engine = match self.engines.entry(tenant.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(file_name);
                let engine = Arc::new(Engine::new(wal_path, self.clock.clone())?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        tracing::info!("opened tenant {tenant}");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

/// Most file systems cap a single path component at 255 bytes.
const MAX_FILE_NAME_LEN: usize = 255;

/// WAL file name for a tenant. ASCII letters, digits, `_` and `-` are kept;
/// every other byte becomes `%xx`. Distinct tenants never share a file.
fn wal_file_name(tenant: &str) -> String {
    let mut out = String::with_capacity(tenant.len() + 4);
    for b in tenant.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02x}"));
        }
    }
    out.push_str(".wal");
    out
}
