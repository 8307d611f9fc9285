use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// One encoded stream frame.
#[derive(Clone, Debug)]
pub struct StreamFrame {
    pub sequence: u64,
    pub jpeg: Arc<Vec<u8>>,
}

#[derive(Debug)]
pub enum NextFrame {
    Frame(StreamFrame),
    Timeout,
    Closed,
}

#[derive(Default)]
struct HubState {
    latest: Option<StreamFrame>,
    sequence: u64,
    closed: bool,
}

/// Latest-frame mailbox between the pump and stream clients.
///
/// Slow clients skip frames; they always get the newest one.
#[derive(Default)]
pub struct FrameHub {
    state: Mutex<HubState>,
    ready: Condvar,
}

impl FrameHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest frame and wake every waiting client.
    pub fn publish(&self, jpeg: Vec<u8>) -> u64 {
        let sequence = match self.state.lock() {
            Ok(mut state) => {
                state.sequence += 1;
                state.latest = Some(StreamFrame {
                    sequence: state.sequence,
                    jpeg: Arc::new(jpeg),
                });
                state.sequence
            }
            Err(_) => return 0,
        };
        self.ready.notify_all();
        sequence
    }

    /// Number of frames published so far.
    pub fn published(&self) -> u64 {
        self.state.lock().map(|state| state.sequence).unwrap_or(0)
    }

    /// Wait for a frame newer than `after`.
    pub fn wait_next(&self, after: u64, timeout: Duration) -> NextFrame {
        let Ok(guard) = self.state.lock() else {
            return NextFrame::Closed;
        };
        let waited = self.ready.wait_timeout_while(guard, timeout, |state| {
            !state.closed && state.sequence <= after
        });
        let Ok((state, _)) = waited else {
            return NextFrame::Closed;
        };
        if state.closed {
            return NextFrame::Closed;
        }
        match &state.latest {
            Some(frame) if frame.sequence > after => NextFrame::Frame(frame.clone()),
            _ => NextFrame::Timeout,
        }
    }

    /// Wake every client and refuse further waits.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiter_gets_newest_frame() {
        let hub = FrameHub::new();
        hub.publish(vec![1]);
        hub.publish(vec![2]);
        match hub.wait_next(0, Duration::from_millis(10)) {
            NextFrame::Frame(frame) => {
                assert_eq!(frame.sequence, 2);
                assert_eq!(*frame.jpeg, vec![2]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            hub.wait_next(2, Duration::from_millis(10)),
            NextFrame::Timeout
        ));
    }

    #[test]
    fn publish_wakes_waiter() {
        let hub = Arc::new(FrameHub::new());
        let publisher = hub.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            publisher.publish(vec![9]);
        });
        assert!(matches!(
            hub.wait_next(0, Duration::from_secs(5)),
            NextFrame::Frame(_)
        ));
        handle.join().unwrap();
    }

    #[test]
    fn close_ends_waits() {
        let hub = FrameHub::new();
        hub.publish(vec![1]);
        hub.close();
        assert!(matches!(
            hub.wait_next(0, Duration::from_secs(5)),
            NextFrame::Closed
        ));
    }
}
