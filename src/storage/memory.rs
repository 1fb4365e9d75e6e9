//! In-memory repository implementation
//!
//! All tables sit behind a single lock so a changeset is applied to a copy
//! and swapped in only when every mutation in it is valid.

use crate::error::{QueueError, Result};
use crate::storage::repository::{Changeset, Repository};
use crate::types::{EntryId, Member, MemberId, QueueEntry, Related, Server, ServerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// The full persisted state
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    servers: HashMap<ServerId, Server>,
    members: HashMap<MemberId, Member>,
    entries: HashMap<EntryId, QueueEntry>,
    related: HashMap<(ServerId, MemberId), Related>,
}

/// Flat, serializable form of the tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    servers: Vec<Server>,
    members: Vec<Member>,
    entries: Vec<QueueEntry>,
    related: Vec<Related>,
}

impl Tables {
    pub(crate) fn insert_server(&mut self, server: Server) {
        self.servers.insert(server.id, server);
    }

    pub(crate) fn insert_member(&mut self, member: Member) {
        self.members.insert(member.id, member);
    }

    pub(crate) fn remove_entry(&mut self, id: EntryId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn upsert_entry(&mut self, entry: QueueEntry) -> Result<()> {
        let duplicate = self.entries.values().any(|existing| {
            existing.id != entry.id
                && existing.member_id == entry.member_id
                && existing.server_id == entry.server_id
        });
        if duplicate {
            return Err(QueueError::Storage {
                message: format!(
                    "member {} already has a queue entry in server {}",
                    entry.member_id, entry.server_id
                ),
            }
            .into());
        }
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    pub(crate) fn upsert_related(&mut self, row: Related) {
        self.related.insert((row.server_id, row.member_id), row);
    }

    /// Apply every mutation of a changeset, stopping at the first invalid one
    pub(crate) fn apply(&mut self, changes: Changeset) -> Result<()> {
        for member in changes.members {
            self.insert_member(member);
        }
        for row in changes.related {
            if row.server_id != changes.server_id {
                return Err(QueueError::Storage {
                    message: format!(
                        "related row for server {} in changeset of server {}",
                        row.server_id, changes.server_id
                    ),
                }
                .into());
            }
            self.upsert_related(row);
        }
        for id in changes.entry_deletes {
            self.remove_entry(id);
        }
        for entry in changes.entry_upserts {
            if entry.server_id != changes.server_id {
                return Err(QueueError::Storage {
                    message: format!(
                        "queue entry for server {} in changeset of server {}",
                        entry.server_id, changes.server_id
                    ),
                }
                .into());
            }
            self.upsert_entry(entry)?;
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            servers: self.servers.values().cloned().collect(),
            members: self.members.values().cloned().collect(),
            entries: self.entries.values().cloned().collect(),
            related: self.related.values().cloned().collect(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut tables = Tables {
            servers: snapshot.servers.into_iter().map(|s| (s.id, s)).collect(),
            members: snapshot.members.into_iter().map(|m| (m.id, m)).collect(),
            ..Tables::default()
        };
        for row in snapshot.related {
            tables.upsert_related(row);
        }
        for entry in snapshot.entries {
            tables.upsert_entry(entry)?;
        }
        Ok(tables)
    }
}

fn lock_error(kind: &str) -> QueueError {
    QueueError::InternalError {
        message: format!("Failed to acquire repository {} lock", kind),
    }
}

/// Repository keeping everything in process memory
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub(crate) fn snapshot(&self) -> Result<Snapshot> {
        let tables = self.tables.read().map_err(|_| lock_error("read"))?;
        Ok(tables.snapshot())
    }

    /// Copy of the current tables, for staging changes outside the lock
    pub(crate) fn tables(&self) -> Result<Tables> {
        self.read(Tables::clone)
    }

    pub(crate) fn replace(&self, tables: Tables) -> Result<()> {
        self.write(|t| {
            *t = tables;
            Ok(())
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        let tables = self.tables.read().map_err(|_| lock_error("read"))?;
        Ok(f(&tables))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.write().map_err(|_| lock_error("write"))?;
        f(&mut tables)
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_server(&self, id: ServerId) -> Result<Option<Server>> {
        self.read(|t| t.servers.get(&id).cloned())
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        self.read(|t| {
            let mut servers: Vec<Server> = t.servers.values().cloned().collect();
            servers.sort_by_key(|s| s.id);
            servers
        })
    }

    async fn upsert_server(&self, server: Server) -> Result<()> {
        self.write(|t| {
            t.insert_server(server);
            Ok(())
        })
    }

    async fn get_member(&self, id: MemberId) -> Result<Option<Member>> {
        self.read(|t| t.members.get(&id).cloned())
    }

    async fn upsert_member(&self, member: Member) -> Result<()> {
        self.write(|t| {
            t.insert_member(member);
            Ok(())
        })
    }

    async fn get_queue_entry(
        &self,
        member_id: MemberId,
        server_id: ServerId,
    ) -> Result<Option<QueueEntry>> {
        self.read(|t| {
            t.entries
                .values()
                .find(|e| e.member_id == member_id && e.server_id == server_id)
                .cloned()
        })
    }

    async fn list_queue_entries(&self, server_id: ServerId) -> Result<Vec<QueueEntry>> {
        self.read(|t| {
            let mut entries: Vec<QueueEntry> = t
                .entries
                .values()
                .filter(|e| e.server_id == server_id)
                .cloned()
                .collect();
            entries.sort_by(|a, b| a.join_time.cmp(&b.join_time).then(a.id.cmp(&b.id)));
            entries
        })
    }

    async fn upsert_queue_entry(&self, entry: QueueEntry) -> Result<()> {
        self.write(|t| t.upsert_entry(entry))
    }

    async fn delete_queue_entry(&self, id: EntryId) -> Result<bool> {
        self.write(|t| Ok(t.remove_entry(id)))
    }

    async fn get_related(
        &self,
        member_id: MemberId,
        server_id: ServerId,
    ) -> Result<Option<Related>> {
        self.read(|t| t.related.get(&(server_id, member_id)).cloned())
    }

    async fn list_related(&self, server_id: ServerId) -> Result<Vec<Related>> {
        self.read(|t| {
            let mut rows: Vec<Related> = t
                .related
                .values()
                .filter(|r| r.server_id == server_id)
                .cloned()
                .collect();
            rows.sort_by_key(|r| r.member_id);
            rows
        })
    }

    async fn upsert_related(&self, row: Related) -> Result<()> {
        self.write(|t| {
            t.upsert_related(row);
            Ok(())
        })
    }

    async fn commit(&self, changes: Changeset) -> Result<()> {
        self.write(|t| {
            let mut staged = t.clone();
            staged.apply(changes)?;
            *t = staged;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::current_timestamp;

    #[tokio::test]
    async fn test_basic_operations() {
        let repo = InMemoryRepository::new();
        repo.upsert_server(Server::new(10)).await.unwrap();
        assert!(repo.get_server(10).await.unwrap().is_some());
        assert!(repo.get_server(11).await.unwrap().is_none());

        let entry = QueueEntry::new(1, 10, current_timestamp());
        repo.upsert_queue_entry(entry.clone()).await.unwrap();
        assert_eq!(repo.get_queue_entry(1, 10).await.unwrap(), Some(entry.clone()));
        assert_eq!(repo.list_queue_entries(10).await.unwrap().len(), 1);

        assert!(repo.delete_queue_entry(entry.id).await.unwrap());
        assert!(!repo.delete_queue_entry(entry.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_duplicate_entry_for_member_and_server() {
        let repo = InMemoryRepository::new();
        repo.upsert_queue_entry(QueueEntry::new(1, 10, current_timestamp()))
            .await
            .unwrap();

        let err = repo
            .upsert_queue_entry(QueueEntry::new(1, 10, current_timestamp()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::Storage { .. })
        ));

        // Same member in another server is fine
        repo.upsert_queue_entry(QueueEntry::new(1, 11, current_timestamp()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let repo = InMemoryRepository::new();
        let existing = QueueEntry::new(1, 10, current_timestamp());
        repo.upsert_queue_entry(existing.clone()).await.unwrap();

        let mut changes = Changeset::new(10);
        changes.members.push(Member::new(2, "two#0002"));
        changes.related.push(Related::new(10, 2, "two"));
        changes.entry_upserts.push(QueueEntry::new(2, 10, current_timestamp()));
        // Conflicts with the existing entry of member 1
        changes.entry_upserts.push(QueueEntry::new(1, 10, current_timestamp()));

        assert!(repo.commit(changes).await.is_err());
        assert!(repo.get_member(2).await.unwrap().is_none());
        assert!(repo.get_related(2, 10).await.unwrap().is_none());
        assert_eq!(repo.list_queue_entries(10).await.unwrap(), vec![existing]);
    }

    #[tokio::test]
    async fn test_commit_replaces_deleted_entry() {
        let repo = InMemoryRepository::new();
        let old = QueueEntry::new(1, 10, current_timestamp());
        repo.upsert_queue_entry(old.clone()).await.unwrap();

        let mut changes = Changeset::new(10);
        changes.entry_deletes.push(old.id);
        changes.entry_upserts.push(QueueEntry::new(1, 10, current_timestamp()));
        repo.commit(changes).await.unwrap();

        let entries = repo.list_queue_entries(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_ne!(entries[0].id, old.id);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let repo = InMemoryRepository::new();
        repo.upsert_server(Server::new(10)).await.unwrap();
        repo.upsert_related(Related::new(10, 1, "one")).await.unwrap();
        repo.upsert_queue_entry(QueueEntry::new(1, 10, current_timestamp()))
            .await
            .unwrap();

        let restored =
            InMemoryRepository::from_tables(Tables::from_snapshot(repo.snapshot().unwrap()).unwrap());
        assert_eq!(restored.list_servers().await.unwrap().len(), 1);
        assert_eq!(restored.list_related(10).await.unwrap().len(), 1);
        assert_eq!(restored.list_queue_entries(10).await.unwrap().len(), 1);
    }
}
