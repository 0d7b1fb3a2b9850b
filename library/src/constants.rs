use std::time::Duration;

pub const DEFAULT_TOPIC_BASE: &str = "https://ntfy.sh";
pub const DEFAULT_TOPIC_PREFIX: &str = "pushPeers_";

pub const STUN_SERVER: &str = "stun://stun.l.google.com:19302";

pub const USER_AGENT: &str = concat!("push-peers/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_CONNECT_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_REDIRECTS: u32 = 10;
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_millis(100);

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

pub const WORKER_THREAD_NAME: &str = "push-peers-signaling";
