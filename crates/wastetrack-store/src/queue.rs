//! At-least-once queues
//!
//! A received message stays in flight until its receipt is deleted; in-flight
//! messages can be requeued, which is how an unacknowledged message gets
//! delivered again.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use wastetrack_domain::repository::MessageQueue;
use wastetrack_types::{Error, QueueMessage, ReceivedMessage, Result};

#[derive(Default)]
struct MemoryQueueState {
    next_id: u64,
    visible: VecDeque<(String, QueueMessage)>,
    in_flight: HashMap<String, (String, QueueMessage)>,
    failing_sends: u32,
    unconfirmed_sends: u32,
    send_attempts: u64,
}

/// In-process queue with injectable send faults
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` sends fail with a queue error
    pub fn inject_send_failures(&self, n: u32) {
        self.state.lock().failing_sends = n;
    }

    /// Make the next `n` sends return without a message id
    pub fn inject_unconfirmed_sends(&self, n: u32) {
        self.state.lock().unconfirmed_sends = n;
    }

    /// Sends attempted so far, including failed ones
    pub fn send_attempts(&self) -> u64 {
        self.state.lock().send_attempts
    }

    /// Visible messages waiting to be received
    pub fn len(&self) -> usize {
        self.state.lock().visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Snapshot of visible messages, oldest first
    pub fn messages(&self) -> Vec<QueueMessage> {
        self.state
            .lock()
            .visible
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Return every in-flight message to the front of the queue
    pub fn requeue_in_flight(&self) -> usize {
        let mut state = self.state.lock();
        let mut pending: Vec<_> = state.in_flight.drain().map(|(_, v)| v).collect();
        pending.sort_by(|a, b| b.0.cmp(&a.0));
        let count = pending.len();
        for item in pending {
            state.visible.push_front(item);
        }
        count
    }
}

impl MessageQueue for MemoryQueue {
    fn send(&self, message: &QueueMessage) -> Result<Option<String>> {
        let mut state = self.state.lock();
        state.send_attempts += 1;
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(Error::Queue("injected send failure".into()));
        }
        if state.unconfirmed_sends > 0 {
            state.unconfirmed_sends -= 1;
            return Ok(None);
        }
        state.next_id += 1;
        let id = format!("msg-{:012}", state.next_id);
        state.visible.push_back((id.clone(), message.clone()));
        Ok(Some(id))
    }

    fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>> {
        let mut state = self.state.lock();
        let mut received = Vec::new();
        while received.len() < max {
            let Some((id, message)) = state.visible.pop_front() else {
                break;
            };
            let receipt = Uuid::new_v4().to_string();
            state
                .in_flight
                .insert(receipt.clone(), (id.clone(), message.clone()));
            received.push(ReceivedMessage {
                message_id: id,
                receipt,
                message,
            });
        }
        Ok(received)
    }

    fn delete(&self, receipt: &str) -> Result<()> {
        self.state
            .lock()
            .in_flight
            .remove(receipt)
            .map(|_| ())
            .ok_or_else(|| Error::Queue(format!("unknown receipt '{receipt}'")))
    }
}

/// Queue spooled to a directory: `pending/` holds visible messages and
/// `inflight/` holds received ones, one JSON file each.
pub struct SpoolQueue {
    pending: PathBuf,
    in_flight: PathBuf,
    sequence: AtomicU64,
}

impl SpoolQueue {
    pub fn open(dir: PathBuf) -> Result<Self> {
        let pending = dir.join("pending");
        let in_flight = dir.join("inflight");
        fs::create_dir_all(&pending)?;
        fs::create_dir_all(&in_flight)?;
        Ok(Self {
            pending,
            in_flight,
            sequence: AtomicU64::new(0),
        })
    }

    /// Message ids sort in send order within and across processes
    fn next_id(&self) -> String {
        let micros = Utc::now().timestamp_micros();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{micros:017}-{seq:010}-{}", Uuid::new_v4().simple())
    }

    fn sorted_ids(dir: &Path) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(Self::sorted_ids(&self.pending)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Move every in-flight message back to pending
    pub fn requeue_in_flight(&self) -> Result<usize> {
        let ids = Self::sorted_ids(&self.in_flight)?;
        for id in &ids {
            let name = format!("{id}.json");
            fs::rename(self.in_flight.join(&name), self.pending.join(&name))?;
        }
        if !ids.is_empty() {
            warn!(count = ids.len(), "requeued unacknowledged messages");
        }
        Ok(ids.len())
    }
}

impl MessageQueue for SpoolQueue {
    fn send(&self, message: &QueueMessage) -> Result<Option<String>> {
        let id = self.next_id();
        let content = serde_json::to_vec(message)?;
        let partial = self.pending.join(format!("{id}.partial"));
        fs::write(&partial, content)?;
        fs::rename(&partial, self.pending.join(format!("{id}.json")))?;
        debug!(message_id = %id, "message spooled");
        Ok(Some(id))
    }

    fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>> {
        let mut received = Vec::new();
        for id in Self::sorted_ids(&self.pending)?.into_iter().take(max) {
            let name = format!("{id}.json");
            let target = self.in_flight.join(&name);
            // Another consumer may have claimed it between listing and rename
            match fs::rename(self.pending.join(&name), &target) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            let message: QueueMessage = serde_json::from_slice(&fs::read(&target)?)?;
            received.push(ReceivedMessage {
                message_id: id.clone(),
                receipt: id,
                message,
            });
        }
        Ok(received)
    }

    fn delete(&self, receipt: &str) -> Result<()> {
        if receipt.contains(['/', '\\']) || receipt.contains("..") {
            return Err(Error::Queue(format!("invalid receipt '{receipt}'")));
        }
        match fs::remove_file(self.in_flight.join(format!("{receipt}.json"))) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::Queue(format!("unknown receipt '{receipt}'")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn msg(body: &str) -> QueueMessage {
        QueueMessage::new(body).with_attribute("timeslot", "2019-01-01T00:01:00")
    }

    fn exercise_fifo(queue: &dyn MessageQueue) {
        for body in ["a", "b", "c"] {
            assert!(queue.send(&msg(body)).unwrap().is_some());
        }
        let first = queue.receive(2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message.body, "a");
        assert_eq!(first[1].message.body, "b");
        assert_eq!(
            first[0].message.attribute("timeslot"),
            Some("2019-01-01T00:01:00")
        );
        for m in &first {
            queue.delete(&m.receipt).unwrap();
        }
        let rest = queue.receive(10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].message.body, "c");
        assert!(queue.delete("no-such-receipt").is_err());
    }

    #[test]
    fn test_memory_queue_fifo() {
        exercise_fifo(&MemoryQueue::new());
    }

    #[test]
    fn test_spool_queue_fifo() {
        let dir = tempdir().unwrap();
        exercise_fifo(&SpoolQueue::open(dir.path().to_path_buf()).unwrap());
    }

    #[test]
    fn test_memory_queue_injected_faults() {
        let queue = MemoryQueue::new();
        queue.inject_send_failures(1);
        queue.inject_unconfirmed_sends(1);
        assert!(queue.send(&msg("x")).is_err());
        assert_eq!(queue.send(&msg("x")).unwrap(), None);
        assert!(queue.send(&msg("x")).unwrap().is_some());
        assert_eq!(queue.send_attempts(), 3);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_unacknowledged_messages_are_redelivered() {
        let queue = MemoryQueue::new();
        queue.send(&msg("a")).unwrap();
        queue.send(&msg("b")).unwrap();
        let got = queue.receive(1).unwrap();
        assert_eq!(got[0].message.body, "a");
        assert_eq!(queue.requeue_in_flight(), 1);
        let again = queue.receive(2).unwrap();
        assert_eq!(again[0].message.body, "a");
        assert_eq!(again[1].message.body, "b");
    }

    #[test]
    fn test_spool_queue_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let queue = SpoolQueue::open(dir.path().to_path_buf()).unwrap();
            queue.send(&msg("persisted")).unwrap();
            queue.receive(1).unwrap();
        }
        let queue = SpoolQueue::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(queue.len().unwrap(), 0);
        assert_eq!(queue.requeue_in_flight().unwrap(), 1);
        let got = queue.receive(1).unwrap();
        assert_eq!(got[0].message.body, "persisted");
    }
}
