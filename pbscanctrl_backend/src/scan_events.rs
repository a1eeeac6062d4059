use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// What a scan reports to the outside, in order of occurrence.
#[derive(Clone, Debug, PartialEq)]
pub enum ScanEvent {
    /// Boards armed and the first scan step loaded.
    Armed,
    /// Scan step `step` (0-based) of `total_len` has been loaded.
    Progress { step: usize, total_len: usize },
    Completed,
    Cancelled,
    /// The scan was torn down after a board error.
    Failed(String),
}

/// Fans every published event out to all live subscribers. Receivers that have been dropped
/// are forgotten on the next publish.
#[derive(Default)]
pub struct EventBus {
    senders: Mutex<Vec<Sender<ScanEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ScanEvent> {
        let (tx, rx) = unbounded();
        self.senders.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: ScanEvent) {
        self.senders
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_subscriber_gets_every_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(ScanEvent::Armed);
        bus.publish(ScanEvent::Completed);
        for rx in [a, b] {
            assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![ScanEvent::Armed, ScanEvent::Completed]);
        }
    }

    #[test]
    fn dropped_receivers_are_forgotten() {
        let bus = EventBus::new();
        drop(bus.subscribe());
        let rx = bus.subscribe();
        bus.publish(ScanEvent::Cancelled);
        assert_eq!(bus.senders.lock().len(), 1);
        assert_eq!(rx.try_recv(), Ok(ScanEvent::Cancelled));
    }
}
