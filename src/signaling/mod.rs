//! Shared signaling state: one call record plus two candidate logs per call id.

pub mod memory;
pub mod record;

pub use memory::MemoryStore;
pub use record::{CallRecord, CallRecordUpdate, CandidateEntry, RecordStatus, Role};

use crate::error::SignalingError;
use crate::peer::types::IceCandidate;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A change observed on a watched call record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    /// The record exists with these contents (on creation, on update, and
    /// once on subscription if it already exists)
    Present(CallRecord),
    /// The record no longer exists
    Deleted,
}

/// Stream of changes; dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx }
    }

    /// `None` once the store side of the subscription is gone
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next item if one is already waiting
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Document store used to bootstrap a call.
///
/// Deletes are idempotent. Record merges are last-writer-wins; the call
/// protocol never relies on anything finer than that plus the conditional
/// create.
#[async_trait]
pub trait SignalingStore: Send + Sync {
    async fn read_call_record(&self, call_id: &str) -> Result<Option<CallRecord>, SignalingError>;

    /// Fails with [`SignalingError::AlreadyExists`] if a record is present
    async fn create_call_record(
        &self,
        call_id: &str,
        record: &CallRecord,
    ) -> Result<(), SignalingError>;

    /// Fails with [`SignalingError::NotFound`] if no record is present
    async fn update_call_record(
        &self,
        call_id: &str,
        update: &CallRecordUpdate,
    ) -> Result<(), SignalingError>;

    async fn delete_call_record(&self, call_id: &str) -> Result<(), SignalingError>;

    async fn watch_call_record(
        &self,
        call_id: &str,
    ) -> Result<Subscription<RecordChange>, SignalingError>;

    async fn append_candidate(
        &self,
        call_id: &str,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<CandidateEntry, SignalingError>;

    async fn list_candidates(
        &self,
        call_id: &str,
        role: Role,
    ) -> Result<Vec<CandidateEntry>, SignalingError>;

    /// Every entry of the log exactly once, in append order, starting with
    /// the entries already present
    async fn watch_candidates(
        &self,
        call_id: &str,
        role: Role,
    ) -> Result<Subscription<CandidateEntry>, SignalingError>;

    async fn delete_candidates(&self, call_id: &str, role: Role) -> Result<(), SignalingError>;

    async fn delete_all_candidates(&self, call_id: &str) -> Result<(), SignalingError> {
        let initiator = self.delete_candidates(call_id, Role::Initiator).await;
        let recipient = self.delete_candidates(call_id, Role::Recipient).await;
        initiator.and(recipient)
    }
}
