//! In-process document store.
//!
//! Records and candidate entries are kept as JSON documents so merges behave
//! like they do in a document database: fields present in the update replace
//! the stored ones, everything else is kept.

use crate::error::SignalingError;
use crate::peer::types::IceCandidate;
use crate::signaling::record::{CallRecord, CallRecordUpdate, CandidateEntry, Role};
use crate::signaling::{RecordChange, SignalingStore, Subscription};
use crate::utils::random_id;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

#[derive(Default)]
struct CandidateLog {
    entries: Vec<Value>,
    next_seq: u64,
    watchers: Vec<mpsc::UnboundedSender<CandidateEntry>>,
}

#[derive(Default)]
struct CallDocument {
    record: Option<Map<String, Value>>,
    record_watchers: Vec<mpsc::UnboundedSender<RecordChange>>,
    logs: [CandidateLog; 2],
}

impl CallDocument {
    fn notify(&mut self, change: RecordChange) {
        // closed receivers are unsubscribed here
        self.record_watchers
            .retain(|tx| tx.send(change.clone()).is_ok());
    }
}

/// Shared store for participants living in the same process.
/// Clones share the same documents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    docs: Arc<Mutex<HashMap<String, CallDocument>>>,
    offline: Arc<AtomicBool>,
}

fn to_document<T: Serialize>(value: &T) -> Result<Map<String, Value>, SignalingError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(SignalingError::Malformed(serde::de::Error::custom(format!(
            "expected an object document, got {other}"
        )))),
    }
}

fn decode_record(map: &Map<String, Value>) -> Result<CallRecord, SignalingError> {
    Ok(serde_json::from_value(Value::Object(map.clone()))?)
}

fn decode_entries(log: &CandidateLog) -> Result<Vec<CandidateEntry>, SignalingError> {
    log.entries
        .iter()
        .map(|v| serde_json::from_value(v.clone()).map_err(SignalingError::from))
        .collect()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the connection to the store
    pub fn set_available(&self, available: bool) {
        info!(available, "memory store availability changed");
        self.offline.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), SignalingError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SignalingError::Unavailable("store is offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn read_call_record(&self, call_id: &str) -> Result<Option<CallRecord>, SignalingError> {
        self.check()?;
        let docs = self.docs.lock().await;
        match docs.get(call_id).and_then(|doc| doc.record.as_ref()) {
            Some(map) => Ok(Some(decode_record(map)?)),
            None => Ok(None),
        }
    }

    async fn create_call_record(
        &self,
        call_id: &str,
        record: &CallRecord,
    ) -> Result<(), SignalingError> {
        self.check()?;
        let map = to_document(record)?;
        let mut docs = self.docs.lock().await;
        let doc = docs.entry(call_id.to_string()).or_default();
        if doc.record.is_some() {
            debug!(call_id, "conditional create rejected, record exists");
            return Err(SignalingError::AlreadyExists(call_id.to_string()));
        }
        doc.record = Some(map);
        doc.notify(RecordChange::Present(record.clone()));
        debug!(call_id, initiator = %record.initiator_id, "call record created");
        Ok(())
    }

    async fn update_call_record(
        &self,
        call_id: &str,
        update: &CallRecordUpdate,
    ) -> Result<(), SignalingError> {
        self.check()?;
        let fields = to_document(update)?;
        let mut docs = self.docs.lock().await;
        let doc = docs
            .get_mut(call_id)
            .filter(|doc| doc.record.is_some())
            .ok_or_else(|| SignalingError::NotFound(call_id.to_string()))?;

        let merged = {
            let Some(map) = doc.record.as_mut() else {
                return Err(SignalingError::NotFound(call_id.to_string()));
            };
            map.extend(fields);
            decode_record(map)?
        };
        doc.notify(RecordChange::Present(merged));
        debug!(call_id, "call record updated");
        Ok(())
    }

    async fn delete_call_record(&self, call_id: &str) -> Result<(), SignalingError> {
        self.check()?;
        let mut docs = self.docs.lock().await;
        if let Some(doc) = docs.get_mut(call_id) {
            if doc.record.take().is_some() {
                doc.notify(RecordChange::Deleted);
                debug!(call_id, "call record deleted");
            }
        }
        Ok(())
    }

    async fn watch_call_record(
        &self,
        call_id: &str,
    ) -> Result<Subscription<RecordChange>, SignalingError> {
        self.check()?;
        let mut docs = self.docs.lock().await;
        let doc = docs.entry(call_id.to_string()).or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(map) = doc.record.as_ref() {
            let _ = tx.send(RecordChange::Present(decode_record(map)?));
        }
        doc.record_watchers.push(tx);
        Ok(Subscription::new(rx))
    }

    async fn append_candidate(
        &self,
        call_id: &str,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<CandidateEntry, SignalingError> {
        self.check()?;
        let mut docs = self.docs.lock().await;
        let log = &mut docs.entry(call_id.to_string()).or_default().logs[role.index()];
        let entry = CandidateEntry {
            id: random_id(),
            seq: log.next_seq + 1,
            role,
            candidate: candidate.clone(),
        };
        log.entries.push(serde_json::to_value(&entry)?);
        log.next_seq = entry.seq;
        log.watchers.retain(|tx| tx.send(entry.clone()).is_ok());
        debug!(call_id, log = role.log_name(), seq = entry.seq, "candidate appended");
        Ok(entry)
    }

    async fn list_candidates(
        &self,
        call_id: &str,
        role: Role,
    ) -> Result<Vec<CandidateEntry>, SignalingError> {
        self.check()?;
        let docs = self.docs.lock().await;
        match docs.get(call_id) {
            Some(doc) => decode_entries(&doc.logs[role.index()]),
            None => Ok(Vec::new()),
        }
    }

    async fn watch_candidates(
        &self,
        call_id: &str,
        role: Role,
    ) -> Result<Subscription<CandidateEntry>, SignalingError> {
        self.check()?;
        let mut docs = self.docs.lock().await;
        let log = &mut docs.entry(call_id.to_string()).or_default().logs[role.index()];
        let (tx, rx) = mpsc::unbounded_channel();
        for entry in decode_entries(log)? {
            let _ = tx.send(entry);
        }
        log.watchers.push(tx);
        Ok(Subscription::new(rx))
    }

    async fn delete_candidates(&self, call_id: &str, role: Role) -> Result<(), SignalingError> {
        self.check()?;
        let mut docs = self.docs.lock().await;
        if let Some(doc) = docs.get_mut(call_id) {
            let log = &mut doc.logs[role.index()];
            if !log.entries.is_empty() {
                debug!(call_id, log = role.log_name(), count = log.entries.len(), "candidates deleted");
            }
            log.entries.clear();
            log.next_seq = 0;
        }
        Ok(())
    }
}
