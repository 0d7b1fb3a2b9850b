use log::{debug, warn};
use push_peers_protocol::{IceCandidate, Signal};

use crate::signaling::SignalSink;

/// Collects local ICE candidates until gathering completes, then publishes them
/// as a single `{"ice": [...]}` message.
///
/// Delivery is at most once: the batch is cleared before publishing and is not
/// queued again when publishing fails.
#[derive(Debug, Default)]
pub struct IceBatcher {
    pending: Vec<IceCandidate>,
}

impl IceBatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sdp_m_line_index: u32, candidate: String) {
        self.pending.push(IceCandidate {
            candidate,
            sdp_m_line_index,
        });
    }

    pub fn peek(&self) -> &[IceCandidate] {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Returns whether a batch was published.
    pub fn flush_on_gathering_complete(&mut self, sink: &dyn SignalSink) -> bool {
        let batch = std::mem::take(&mut self.pending);
        if batch.is_empty() {
            debug!("ICE gathering complete without candidates");
            return false;
        }
        let count = batch.len();
        let body = match Signal::Ice(batch).to_body() {
            Ok(body) => body,
            Err(err) => {
                warn!("dropping ICE batch: {err}");
                return false;
            }
        };
        match sink.publish(&body) {
            Ok(()) => {
                debug!("published {count} ICE candidates");
                true
            }
            Err(err) => {
                warn!("dropping {count} ICE candidates: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;

    use crate::transport::TransportError;

    use super::*;

    struct Sink {
        sent: RefCell<Vec<String>>,
        fail: bool,
    }

    impl Sink {
        fn new(fail: bool) -> Self {
            Self {
                sent: RefCell::new(Vec::new()),
                fail,
            }
        }
    }

    impl SignalSink for Sink {
        fn publish(&self, text: &str) -> Result<(), TransportError> {
            self.sent.borrow_mut().push(text.to_owned());
            if self.fail {
                return Err(TransportError::Failed {
                    url: "https://relay/t".to_owned(),
                    reason: "offline".to_owned(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn flush_clears_previous_batch() {
        let sink = Sink::new(false);
        let mut batcher = IceBatcher::new();
        batcher.add(0, "candidate:1".to_owned());
        batcher.add(1, "candidate:2".to_owned());
        assert!(batcher.flush_on_gathering_complete(&sink));

        batcher.add(0, "candidate:3".to_owned());
        assert_eq!(
            batcher.peek(),
            &[IceCandidate {
                candidate: "candidate:3".to_owned(),
                sdp_m_line_index: 0,
            }]
        );
    }

    #[test]
    fn published_batch_keeps_order() {
        let sink = Sink::new(false);
        let mut batcher = IceBatcher::new();
        batcher.add(0, "candidate:1 1 UDP 2122252543 10.0.0.2 51000 typ host".to_owned());
        batcher.add(1, "candidate:2 1 UDP 1686052863 84.1.2.3 51000 typ srflx".to_owned());
        let expected = batcher.peek().to_vec();
        batcher.flush_on_gathering_complete(&sink);

        let sent = sink.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(Signal::parse(&sent[0]).unwrap(), Signal::Ice(expected));
    }

    #[test]
    fn failed_publish_is_not_requeued() {
        let sink = Sink::new(true);
        let mut batcher = IceBatcher::new();
        batcher.add(0, "candidate:1".to_owned());
        assert!(!batcher.flush_on_gathering_complete(&sink));
        assert!(batcher.peek().is_empty());
        assert!(!batcher.flush_on_gathering_complete(&sink));
        assert_eq!(sink.sent.borrow().len(), 1);
    }
}
