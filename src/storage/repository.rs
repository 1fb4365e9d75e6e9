//! Repository interface and the atomic changeset

use crate::error::{QueueError, Result};
use crate::types::{
    EntryId, Member, MemberId, MemberRef, QueueEntry, Related, Server, ServerId,
};
use async_trait::async_trait;
use std::fmt::Debug;

/// All mutations produced by one reconciliation pass of one server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub server_id: ServerId,
    pub members: Vec<Member>,
    pub related: Vec<Related>,
    pub entry_upserts: Vec<QueueEntry>,
    pub entry_deletes: Vec<EntryId>,
}

impl Changeset {
    pub fn new(server_id: ServerId) -> Self {
        Self {
            server_id,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
            && self.related.is_empty()
            && self.entry_upserts.is_empty()
            && self.entry_deletes.is_empty()
    }

    pub fn mutation_count(&self) -> usize {
        self.members.len() + self.related.len() + self.entry_upserts.len() + self.entry_deletes.len()
    }
}

/// Trait for entity persistence
#[async_trait]
pub trait Repository: Send + Sync + Debug {
    async fn get_server(&self, id: ServerId) -> Result<Option<Server>>;

    async fn list_servers(&self) -> Result<Vec<Server>>;

    async fn upsert_server(&self, server: Server) -> Result<()>;

    async fn get_member(&self, id: MemberId) -> Result<Option<Member>>;

    async fn upsert_member(&self, member: Member) -> Result<()>;

    async fn get_queue_entry(
        &self,
        member_id: MemberId,
        server_id: ServerId,
    ) -> Result<Option<QueueEntry>>;

    async fn list_queue_entries(&self, server_id: ServerId) -> Result<Vec<QueueEntry>>;

    /// Insert or replace by id; rejects a second entry for the same member and server
    async fn upsert_queue_entry(&self, entry: QueueEntry) -> Result<()>;

    /// Returns whether an entry was removed
    async fn delete_queue_entry(&self, id: EntryId) -> Result<bool>;

    async fn get_related(&self, member_id: MemberId, server_id: ServerId)
        -> Result<Option<Related>>;

    async fn list_related(&self, server_id: ServerId) -> Result<Vec<Related>>;

    async fn upsert_related(&self, row: Related) -> Result<()>;

    /// Apply every mutation of the changeset, or none of them
    async fn commit(&self, changes: Changeset) -> Result<()>;
}

/// Normalize any member reference into a stored member
pub async fn resolve_member(repository: &dyn Repository, reference: &MemberRef) -> Result<Member> {
    let id = reference.member_id().ok_or_else(|| QueueError::MemberNotFound {
        reference: reference.to_string(),
    })?;

    repository.get_member(id).await?.ok_or_else(|| {
        QueueError::MemberNotFound {
            reference: reference.to_string(),
        }
        .into()
    })
}
