use std::collections::BTreeMap;

use livecast_core::{ConnectionId, Frame, ServerEvent};
use parking_lot::Mutex;

use crate::outbox::Outbox;

/// Outbox that records decoded events per connection.
#[derive(Default)]
pub struct RecordingOutbox {
    inboxes: Mutex<BTreeMap<ConnectionId, Vec<ServerEvent>>>,
}

impl RecordingOutbox {
    pub fn connect(&self) -> ConnectionId {
        let id = ConnectionId::new();
        self.inboxes.lock().insert(id.clone(), Vec::new());
        id
    }

    /// Drain everything received by `id` so far.
    pub fn take(&self, id: &ConnectionId) -> Vec<ServerEvent> {
        self.inboxes
            .lock()
            .get_mut(id)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn push(inbox: &mut Vec<ServerEvent>, frame: &Frame) {
        inbox.push(ServerEvent::decode(frame).expect("engine emitted an undecodable frame"));
    }
}

impl Outbox for RecordingOutbox {
    fn send_to(&self, connection: &ConnectionId, frame: Frame) -> bool {
        match self.inboxes.lock().get_mut(connection) {
            Some(inbox) => {
                Self::push(inbox, &frame);
                true
            }
            None => false,
        }
    }

    fn send_batch_to(&self, connection: &ConnectionId, frames: Vec<Frame>) -> bool {
        match self.inboxes.lock().get_mut(connection) {
            Some(inbox) => {
                for frame in &frames {
                    Self::push(inbox, frame);
                }
                true
            }
            None => false,
        }
    }

    fn broadcast(&self, frame: Frame, except: Option<&ConnectionId>) -> usize {
        let mut inboxes = self.inboxes.lock();
        let mut sent = 0;
        for (id, inbox) in inboxes.iter_mut() {
            if Some(id) == except {
                continue;
            }
            Self::push(inbox, &frame);
            sent += 1;
        }
        sent
    }
}
