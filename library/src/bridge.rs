use log::{debug, info};

use crate::media::{ChannelId, ChannelOrigin};

/// Binds the first established data channel of a call for chat text.
///
/// Inbound text is only accepted from that channel, so traffic of a stale or
/// foreign channel on a shared topic never reaches the caller.
#[derive(Debug, Default)]
pub struct DataChannelBridge {
    bound: Option<ChannelId>,
    detached: bool,
}

impl DataChannelBridge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `channel` became the bound channel.
    pub fn on_channel_open(&mut self, channel: ChannelId, origin: ChannelOrigin) -> bool {
        if self.detached || self.bound.is_some() {
            debug!("ignoring {origin:?} data channel {channel:?}");
            return false;
        }
        info!("bound {origin:?} data channel {channel:?}");
        self.bound = Some(channel);
        true
    }

    /// Channel to send outbound text on, if any.
    pub const fn outbound(&self) -> Option<ChannelId> {
        self.bound
    }

    pub fn accept_inbound(&self, channel: ChannelId) -> bool {
        self.bound == Some(channel)
    }

    /// Returns whether the close ends the call, i.e. the bound channel (or a channel
    /// before any was bound) went away.
    pub fn on_channel_closed(&mut self, channel: ChannelId) -> bool {
        if self.detached {
            return false;
        }
        match self.bound {
            Some(bound) if bound != channel => {
                debug!("unbound data channel {channel:?} closed");
                false
            }
            _ => {
                self.detach();
                true
            }
        }
    }

    pub fn detach(&mut self) {
        self.bound = None;
        self.detached = true;
    }

    pub const fn is_detached(&self) -> bool {
        self.detached
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_opened_channel_is_bound() {
        let mut bridge = DataChannelBridge::new();
        assert!(bridge.on_channel_open(ChannelId(2), ChannelOrigin::Remote));
        assert!(!bridge.on_channel_open(ChannelId(1), ChannelOrigin::Local));
        assert_eq!(bridge.outbound(), Some(ChannelId(2)));
        assert!(bridge.accept_inbound(ChannelId(2)));
        assert!(!bridge.accept_inbound(ChannelId(1)));
    }

    #[test]
    fn closing_bound_channel_ends_the_call() {
        let mut bridge = DataChannelBridge::new();
        bridge.on_channel_open(ChannelId(1), ChannelOrigin::Local);
        assert!(!bridge.on_channel_closed(ChannelId(9)));
        assert!(bridge.on_channel_closed(ChannelId(1)));
        assert!(bridge.is_detached());
        assert_eq!(bridge.outbound(), None);
        assert!(!bridge.on_channel_closed(ChannelId(1)));
    }

    #[test]
    fn detached_bridge_binds_nothing() {
        let mut bridge = DataChannelBridge::new();
        bridge.detach();
        assert!(!bridge.on_channel_open(ChannelId(1), ChannelOrigin::Local));
        assert!(!bridge.accept_inbound(ChannelId(1)));
    }
}
