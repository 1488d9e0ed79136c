use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::exchange::transport::{ExitStatus, Transport, TransportEvent};
use crate::protocol::{FrameMode, RequestSpec};

const CLIENT_CACHE_MAX_ENTRIES: usize = 16;

fn build_reqwest_client(
    connect_timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, StreamError> {
    let mut builder = reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| StreamError::InvalidRequest(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| StreamError::InvalidRequest(format!("Failed to build HTTP client: {err}")))
}

/// Shared reqwest clients, one per connect-timeout, so connection pools are
/// reused across exchanges.
#[derive(Debug)]
pub struct ClientCache {
    proxy_url: Option<String>,
    use_env_proxy: bool,
    clients: RwLock<FxHashMap<u64, reqwest::Client>>,
}

impl ClientCache {
    #[must_use]
    pub fn new(proxy_url: Option<String>, use_env_proxy: bool) -> Self {
        Self {
            proxy_url: proxy_url.filter(|url| !url.is_empty()),
            use_env_proxy,
            clients: RwLock::new(FxHashMap::default()),
        }
    }

    /// Client configured with `connect_timeout`, built on first use.
    ///
    /// # Errors
    ///
    /// Returns an error when the proxy URL is invalid or the TLS backend
    /// cannot be initialised.
    pub fn client_for(&self, connect_timeout: Duration) -> Result<reqwest::Client, StreamError> {
        let key = u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX);
        if let Some(client) = self.clients.read().get(&key) {
            return Ok(client.clone());
        }

        let built =
            build_reqwest_client(connect_timeout, self.use_env_proxy, self.proxy_url.as_deref())?;
        let mut clients = self.clients.write();
        if clients.len() >= CLIENT_CACHE_MAX_ENTRIES && !clients.contains_key(&key) {
            clients.clear();
        }
        Ok(clients.entry(key).or_insert(built).clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport that executes a [`RequestSpec`] over HTTP with reqwest.
///
/// reqwest removes the chunked transfer coding before handing out body
/// frames, so for chunked-array providers each frame is re-wrapped as
/// `<hex-len>\r\n<payload>\r\n` to keep the decoder's input format intact.
#[derive(Debug)]
pub struct HttpTransport {
    clients: Arc<ClientCache>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(clients: Arc<ClientCache>) -> Self {
        Self {
            clients,
            stop: CancellationToken::new(),
            task: None,
        }
    }
}

impl Transport for HttpTransport {
    fn dispatch(
        &mut self,
        spec: &RequestSpec,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, StreamError> {
        if self.task.is_some() {
            return Err(StreamError::InvalidRequest(
                "transport already dispatched a request".into(),
            ));
        }
        let client = self.clients.client_for(spec.connect_timeout())?;
        let request = client
            .request(spec.method(), spec.url())
            .headers(spec.headers().clone())
            .body(spec.body().clone())
            .timeout(spec.timeout());
        let rechunk = spec.provider().frame_mode() == FrameMode::ChunkedArray;

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = self.stop.clone();
        self.task = Some(tokio::spawn(async move {
            let status = tokio::select! {
                biased;
                () = stop.cancelled() => ExitStatus::TERMINATED,
                status = stream_response(request, rechunk, &tx) => status,
            };
            let _ = tx.send(TransportEvent::Exited(status));
        }));
        Ok(rx)
    }

    fn terminate(&mut self, graceful: bool) {
        if graceful {
            self.stop.cancel();
        } else if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn stream_response(
    request: reqwest::RequestBuilder,
    rechunk: bool,
    tx: &mpsc::UnboundedSender<TransportEvent>,
) -> ExitStatus {
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return report_error(&err, tx),
    };
    let status = response.status().as_u16();
    if tx.send(TransportEvent::Dispatched { status }).is_err() {
        return ExitStatus::TERMINATED;
    }

    let mut body = response.bytes_stream();
    while let Some(item) = body.next().await {
        match item {
            Ok(bytes) if bytes.is_empty() => {}
            Ok(bytes) => {
                let frame = if rechunk { rechunk_frame(&bytes) } else { bytes };
                if tx.send(TransportEvent::Bytes(frame)).is_err() {
                    return ExitStatus::TERMINATED;
                }
            }
            Err(err) => return report_error(&err, tx),
        }
    }
    ExitStatus::SUCCESS
}

fn rechunk_frame(payload: &[u8]) -> Bytes {
    let header = format!("{:x}\r\n", payload.len());
    let mut frame = BytesMut::with_capacity(header.len() + payload.len() + 2);
    frame.put_slice(header.as_bytes());
    frame.put_slice(payload);
    frame.put_slice(b"\r\n");
    frame.freeze()
}

fn report_error(err: &reqwest::Error, tx: &mpsc::UnboundedSender<TransportEvent>) -> ExitStatus {
    let detail = error_chain(err);
    let status = exit_status_for(err, &detail);
    let _ = tx.send(TransportEvent::Stderr(detail));
    status
}

fn exit_status_for(err: &reqwest::Error, detail: &str) -> ExitStatus {
    if err.is_timeout() {
        ExitStatus::OPERATION_TIMEDOUT
    } else if err.is_connect() {
        if is_dns_failure(detail) {
            ExitStatus::COULDNT_RESOLVE_HOST
        } else {
            ExitStatus::COULDNT_CONNECT
        }
    } else {
        ExitStatus::RECV_ERROR
    }
}

fn is_dns_failure(detail: &str) -> bool {
    let lower = detail.to_ascii_lowercase();
    ["dns error", "failed to lookup address", "name or service not known", "no such host"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
