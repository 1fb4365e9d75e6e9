//! JSON file backed repository
//!
//! Keeps the working set in an `InMemoryRepository` and rewrites the whole
//! snapshot after every mutation. Writes go to a sibling temp file that is
//! renamed over the target, so a crash never leaves a half-written file.
//! Mutations are staged on a copy of the tables and only become visible in
//! memory after the rename succeeded.

use crate::error::{QueueError, Result};
use crate::storage::memory::{InMemoryRepository, Snapshot, Tables};
use crate::storage::repository::{Changeset, Repository};
use crate::types::{EntryId, Member, MemberId, QueueEntry, Related, Server, ServerId};
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    inner: InMemoryRepository,
    write_lock: Mutex<()>,
}

impl JsonFileRepository {
    /// Open the snapshot at `path`, starting empty if it does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = match tokio::fs::read(&path).await {
            Ok(raw) => {
                let snapshot: Snapshot = serde_json::from_slice(&raw)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                info!("Loaded queue records from {}", path.display());
                Tables::from_snapshot(snapshot)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No records at {}, starting empty", path.display());
                Tables::default()
            }
            Err(e) => {
                return Err(QueueError::Storage {
                    message: format!("Failed to read {}: {}", path.display(), e),
                }
                .into())
            }
        };

        Ok(Self {
            path,
            inner: InMemoryRepository::from_tables(tables),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current state to disk
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.inner.snapshot()?;
        self.persist(&snapshot).await
    }

    /// Apply `f` to a copy of the tables and publish the copy only once it
    /// is on disk, so a failed write leaves memory and file unchanged
    async fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut staged = self.inner.tables()?;
        let value = f(&mut staged)?;
        self.persist(&staged.snapshot()).await?;
        self.inner.replace(staged)?;
        Ok(value)
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let raw = serde_json::to_vec_pretty(snapshot).map_err(|e| QueueError::Storage {
            message: format!("Failed to serialize records: {}", e),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| QueueError::Storage {
                message: format!("Failed to write {}: {}", tmp.display(), e),
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| QueueError::Storage {
                message: format!("Failed to replace {}: {}", self.path.display(), e),
            })?;

        debug!("Flushed queue records to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl Repository for JsonFileRepository {
    async fn get_server(&self, id: ServerId) -> Result<Option<Server>> {
        self.inner.get_server(id).await
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        self.inner.list_servers().await
    }

    async fn upsert_server(&self, server: Server) -> Result<()> {
        self.mutate(|t| {
            t.insert_server(server);
            Ok(())
        })
        .await
    }

    async fn get_member(&self, id: MemberId) -> Result<Option<Member>> {
        self.inner.get_member(id).await
    }

    async fn upsert_member(&self, member: Member) -> Result<()> {
        self.mutate(|t| {
            t.insert_member(member);
            Ok(())
        })
        .await
    }

    async fn get_queue_entry(
        &self,
        member_id: MemberId,
        server_id: ServerId,
    ) -> Result<Option<QueueEntry>> {
        self.inner.get_queue_entry(member_id, server_id).await
    }

    async fn list_queue_entries(&self, server_id: ServerId) -> Result<Vec<QueueEntry>> {
        self.inner.list_queue_entries(server_id).await
    }

    async fn upsert_queue_entry(&self, entry: QueueEntry) -> Result<()> {
        self.mutate(|t| t.upsert_entry(entry)).await
    }

    async fn delete_queue_entry(&self, id: EntryId) -> Result<bool> {
        self.mutate(|t| Ok(t.remove_entry(id))).await
    }

    async fn get_related(
        &self,
        member_id: MemberId,
        server_id: ServerId,
    ) -> Result<Option<Related>> {
        self.inner.get_related(member_id, server_id).await
    }

    async fn list_related(&self, server_id: ServerId) -> Result<Vec<Related>> {
        self.inner.list_related(server_id).await
    }

    async fn upsert_related(&self, row: Related) -> Result<()> {
        self.mutate(|t| {
            t.upsert_related(row);
            Ok(())
        })
        .await
    }

    async fn commit(&self, changes: Changeset) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.mutate(|t| t.apply(changes)).await
    }
}
