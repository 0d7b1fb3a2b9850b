/*!
Single-shot HTTP requests with connection-level retry.

A [`Transport`] owns one [`Connector`] and issues every request of a call
serially from the worker thread. Connection establishment failures (DNS,
proxy, connect) are retried [`TransportConfig::connect_retries`] times with a
fixed delay; every other failure is terminal. Response bodies are streamed to a
[`TransferObserver`], which can also abort the transfer from its progress
callback.
 */

use std::io::{self, Read};
use std::ops::ControlFlow;
use std::thread;
use std::time::Instant;

use log::{debug, warn};

use crate::config::TransportConfig;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub method: Method,
    pub url: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    pub body: Option<&'a [u8]>,
    /// Long-lived response body: read timeouts are progress ticks instead of errors.
    pub streaming: bool,
}

impl<'a> Request<'a> {
    #[must_use]
    pub const fn get(url: &'a str, headers: &'a [(&'a str, &'a str)]) -> Self {
        Self {
            method: Method::Get,
            url,
            headers,
            body: None,
            streaming: false,
        }
    }

    #[must_use]
    pub const fn post(url: &'a str, headers: &'a [(&'a str, &'a str)], body: &'a [u8]) -> Self {
        Self {
            method: Method::Post,
            url,
            headers,
            body: Some(body),
            streaming: false,
        }
    }

    #[must_use]
    pub const fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }
}

/// Metadata of a response, available before its body is read.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_type: Option<String>,
    /// Effective URL after redirects.
    pub url: String,
}

pub struct Opened {
    pub head: ResponseHead,
    pub body: Box<dyn Read + Send>,
}

/// Why a [`Connector`] could not produce a response.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum OpenError {
    /// Name resolution, proxy or TCP/TLS connect failed; worth retrying.
    Connect(String),
    Other(String),
}

/// Seam between the transport and an HTTP client.
///
/// Implementations return non-2xx responses as `Ok`; status handling belongs to [`Transport`].
pub trait Connector: Send + Sync {
    /// # Errors
    /// Errs when no response head could be obtained.
    fn open(&self, request: &Request<'_>) -> Result<Opened, OpenError>;
}

/// Transfer counters handed to [`TransferObserver::on_progress`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Progress {
    pub downloaded: u64,
    pub uploaded: u64,
}

/// Callbacks invoked while a request is in flight. All of them are optional.
pub trait TransferObserver {
    /// Called once with the response head of a 2xx response, before any body data.
    ///
    /// # Errors
    /// A rejection ends the request with [`TransportError::Rejected`].
    fn verify(&mut self, _head: &ResponseHead) -> Result<(), String> {
        Ok(())
    }

    fn on_data(&mut self, _chunk: &[u8]) {}

    /// Called before every read, including reads that time out while the body is idle.
    /// Returning `Break` aborts the transfer.
    fn on_progress(&mut self, _progress: Progress) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

impl TransferObserver for () {}

/// Successful end of a request.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Completion {
    /// The whole body was delivered.
    Finished,
    /// The observer stopped the transfer.
    Aborted,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not connect to {url} after {attempts} attempts: {reason}")]
    ConnectExhausted {
        url: String,
        attempts: u32,
        reason: String,
    },
    #[error("{url} answered with HTTP status {status}")]
    Status { url: String, status: u16 },
    #[error("response from {url} rejected: {reason}")]
    Rejected { url: String, reason: String },
    #[error("reading response from {url} failed: {source}")]
    Io {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("request to {url} failed: {reason}")]
    Failed { url: String, reason: String },
}

const READ_BUFFER_SIZE: usize = 8 * 1024;

pub struct Transport<C = UreqConnector> {
    connector: C,
    config: TransportConfig,
}

impl Transport<UreqConnector> {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        let connector = UreqConnector::new(&config);
        Self { connector, config }
    }
}

impl<C: Connector> Transport<C> {
    pub const fn with_connector(connector: C, config: TransportConfig) -> Self {
        Self { connector, config }
    }

    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Performs one request, streaming the response body into `observer`.
    ///
    /// # Errors
    /// Errs when connecting keeps failing after all retries, on any other client
    /// failure, on a non-2xx status, when `observer` rejects the response head or
    /// when reading the body fails. Nothing is retried once a response was obtained.
    pub fn request(
        &self,
        request: &Request<'_>,
        observer: &mut dyn TransferObserver,
    ) -> Result<Completion, TransportError> {
        let started = Instant::now();
        let Opened { head, mut body } = self.open_with_retry(request)?;
        let url = request.url.to_owned();

        if !(200..300).contains(&head.status) {
            return Err(TransportError::Status {
                url,
                status: head.status,
            });
        }
        observer
            .verify(&head)
            .map_err(|reason| TransportError::Rejected {
                url: url.clone(),
                reason,
            })?;

        let mut progress = Progress {
            downloaded: 0,
            uploaded: request
                .body
                .map_or(0, |body| u64::try_from(body.len()).unwrap_or(u64::MAX)),
        };
        let mut buffer = vec![0_u8; READ_BUFFER_SIZE];
        let completion = loop {
            if observer.on_progress(progress).is_break() {
                break Completion::Aborted;
            }
            match body.read(&mut buffer) {
                Ok(0) => break Completion::Finished,
                Ok(read) => {
                    progress.downloaded = progress
                        .downloaded
                        .saturating_add(u64::try_from(read).unwrap_or(u64::MAX));
                    observer.on_data(buffer.get(..read).unwrap_or_default());
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if request.streaming && is_idle(&err) => {}
                Err(source) => return Err(TransportError::Io { url, source }),
            }
        };

        debug!(
            "{} {} -> {} ({}), up {} B, down {} B, {:?}, {:?}",
            request.method.as_str(),
            head.url,
            head.status,
            head.content_type.as_deref().unwrap_or("no content type"),
            progress.uploaded,
            progress.downloaded,
            started.elapsed(),
            completion,
        );
        Ok(completion)
    }

    fn open_with_retry(&self, request: &Request<'_>) -> Result<Opened, TransportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connector.open(request) {
                Ok(opened) => return Ok(opened),
                Err(OpenError::Connect(reason)) if attempt <= self.config.connect_retries => {
                    warn!(
                        "connecting to {} failed ({reason}), retry {attempt} of {}",
                        request.url, self.config.connect_retries
                    );
                    thread::sleep(self.config.retry_delay());
                }
                Err(OpenError::Connect(reason)) => {
                    return Err(TransportError::ConnectExhausted {
                        url: request.url.to_owned(),
                        attempts: attempt,
                        reason,
                    })
                }
                Err(OpenError::Other(reason)) => {
                    return Err(TransportError::Failed {
                        url: request.url.to_owned(),
                        reason,
                    })
                }
            }
        }
    }
}

/// Read timeouts on an idle streaming body are progress ticks.
fn is_idle(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// [`Connector`] backed by `ureq`.
///
/// Streaming requests get a socket read timeout equal to the poll interval so an
/// idle stream still produces progress ticks. Every other response is read with
/// the connect timeout, and a stalled body fails the request.
pub struct UreqConnector {
    agent: ureq::Agent,
    streaming_agent: ureq::Agent,
}

impl UreqConnector {
    #[must_use]
    pub fn new(config: &TransportConfig) -> Self {
        let builder = || {
            ureq::AgentBuilder::new()
                .user_agent(&config.user_agent)
                .redirects(config.max_redirects)
                .timeout_connect(config.connect_timeout())
        };
        Self {
            agent: builder().timeout_read(config.connect_timeout()).build(),
            streaming_agent: builder().timeout_read(config.poll_interval()).build(),
        }
    }
}

impl Connector for UreqConnector {
    fn open(&self, request: &Request<'_>) -> Result<Opened, OpenError> {
        let agent = if request.streaming {
            &self.streaming_agent
        } else {
            &self.agent
        };
        let mut call = agent.request(request.method.as_str(), request.url);
        for (name, value) in request.headers {
            call = call.set(name, value);
        }
        let result = match request.body {
            Some(body) => call.send_bytes(body),
            None => call.call(),
        };
        let response = match result {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => return Err(classify(&transport)),
        };

        let head = ResponseHead {
            status: response.status(),
            content_type: response.header("content-type").map(str::to_owned),
            url: response.get_url().to_owned(),
        };
        Ok(Opened {
            head,
            body: Box::new(response.into_reader()),
        })
    }
}

fn classify(transport: &ureq::Transport) -> OpenError {
    match transport.kind() {
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::ProxyConnect => {
            OpenError::Connect(transport.to_string())
        }
        _ => OpenError::Other(transport.to_string()),
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use std::sync::Mutex;

    use super::*;

    struct Canned {
        status: u16,
        chunks: Mutex<Vec<io::Result<Vec<u8>>>>,
    }

    struct ChunkReader(Vec<io::Result<Vec<u8>>>);

    impl Read for ChunkReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let chunk = self.0.remove(0)?;
            let mut cursor = Cursor::new(chunk);
            let read = cursor.read(buf)?;
            Ok(read)
        }
    }

    impl Connector for Canned {
        fn open(&self, request: &Request<'_>) -> Result<Opened, OpenError> {
            let chunks = std::mem::take(&mut *self.chunks.lock().unwrap());
            Ok(Opened {
                head: ResponseHead {
                    status: self.status,
                    content_type: Some("text/plain".to_owned()),
                    url: request.url.to_owned(),
                },
                body: Box::new(ChunkReader(chunks)),
            })
        }
    }

    fn transport(status: u16, chunks: Vec<io::Result<Vec<u8>>>) -> Transport<Canned> {
        let connector = Canned {
            status,
            chunks: Mutex::new(chunks),
        };
        let config = TransportConfig {
            retry_delay_ms: 0,
            ..TransportConfig::default()
        };
        Transport::with_connector(connector, config)
    }

    #[derive(Default)]
    struct Collect {
        data: Vec<u8>,
        ticks: usize,
        stop_after: Option<usize>,
    }

    impl TransferObserver for Collect {
        fn on_data(&mut self, chunk: &[u8]) {
            self.data.extend_from_slice(chunk);
        }

        fn on_progress(&mut self, _progress: Progress) -> ControlFlow<()> {
            self.ticks += 1;
            match self.stop_after {
                Some(limit) if self.ticks > limit => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }
    }

    #[test]
    fn body_is_streamed_and_timeouts_are_ticks() {
        let transport = transport(
            200,
            vec![
                Ok(b"hello ".to_vec()),
                Err(io::ErrorKind::TimedOut.into()),
                Ok(b"world".to_vec()),
            ],
        );
        let mut observer = Collect::default();
        let completion = transport
            .request(&Request::get("http://relay/t", &[]).streaming(), &mut observer)
            .unwrap();
        assert_eq!(completion, Completion::Finished);
        assert_eq!(observer.data, b"hello world");
        assert_eq!(observer.ticks, 4);
    }

    #[test]
    fn stalled_publish_response_fails() {
        let transport = transport(
            200,
            vec![
                Ok(b"{\"id\"".to_vec()),
                Err(io::ErrorKind::TimedOut.into()),
                Ok(b":1}".to_vec()),
            ],
        );
        let mut observer = Collect::default();
        let err = transport
            .request(&Request::post("http://relay/t", &[], b"x"), &mut observer)
            .unwrap_err();
        match err {
            TransportError::Io { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::TimedOut);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(observer.data, b"{\"id\"");
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let transport = transport(
            200,
            vec![Err(io::ErrorKind::Interrupted.into()), Ok(b"ok".to_vec())],
        );
        let mut observer = Collect::default();
        let completion = transport
            .request(&Request::post("http://relay/t", &[], b"x"), &mut observer)
            .unwrap();
        assert_eq!(completion, Completion::Finished);
        assert_eq!(observer.data, b"ok");
    }

    #[test]
    fn progress_break_aborts_successfully() {
        let transport = transport(200, vec![Ok(b"a".to_vec()), Ok(b"b".to_vec())]);
        let mut observer = Collect {
            stop_after: Some(1),
            ..Collect::default()
        };
        let completion = transport
            .request(&Request::get("http://relay/t", &[]), &mut observer)
            .unwrap();
        assert_eq!(completion, Completion::Aborted);
        assert_eq!(observer.data, b"a");
    }

    #[test]
    fn non_success_status_is_terminal() {
        let transport = transport(404, vec![Ok(b"missing".to_vec())]);
        let mut observer = Collect::default();
        let err = transport
            .request(&Request::post("http://relay/t", &[], b"x"), &mut observer)
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 404, .. }));
        assert!(observer.data.is_empty());
    }

    #[test]
    fn rejected_head_is_terminal() {
        struct Reject;
        impl TransferObserver for Reject {
            fn verify(&mut self, head: &ResponseHead) -> Result<(), String> {
                Err(format!("unexpected {:?}", head.content_type))
            }
        }
        let transport = transport(200, vec![Ok(b"x".to_vec())]);
        let err = transport
            .request(&Request::get("http://relay/t", &[]), &mut Reject)
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }));
    }

    #[test]
    fn broken_body_is_reported() {
        let transport = transport(200, vec![Err(io::ErrorKind::ConnectionReset.into())]);
        let err = transport
            .request(&Request::get("http://relay/t", &[]), &mut ())
            .unwrap_err();
        assert!(matches!(err, TransportError::Io { .. }));
    }
}
