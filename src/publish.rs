//! Concurrent fan-out of one protocol message to many relays.
//!
//! Each relay gets its own task that connects, sends the payload, waits for a
//! single reply frame and closes. The whole group shares one deadline; relays
//! still pending when it passes are abandoned and reported as timed out.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, bail};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::Settings,
    error::{Error, Result},
};

/// What happened to one relay during a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The relay answered; holds its first reply frame.
    Success(String),
    /// Connecting, sending or receiving failed.
    ConnectionFailed(String),
    /// No reply before the deadline. The relay may still have accepted the
    /// message, so treat this as unknown rather than failed.
    TimedOut,
}

impl RelayOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RelayOutcome::Success(_))
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayOutcome::Success(reply) => write!(f, "ok: {reply}"),
            RelayOutcome::ConnectionFailed(reason) => write!(f, "failed: {reason}"),
            RelayOutcome::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Outcome per relay URL. Carries no ordering.
#[derive(Debug, Default)]
pub struct PublishReport {
    outcomes: HashMap<String, RelayOutcome>,
}

impl PublishReport {
    #[cfg(test)]
    pub fn get(&self, relay: &str) -> Option<&RelayOutcome> {
        self.outcomes.get(relay)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RelayOutcome)> {
        self.outcomes.iter()
    }

    /// Number of distinct relays attempted.
    pub fn relay_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    /// Relays worth retrying: everything that did not succeed.
    pub fn unsuccessful(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .outcomes
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort();
        urls
    }
}

/// Sends payloads to relays with a bounded wait.
#[derive(Debug, Clone)]
pub struct Publisher {
    timeout: Duration,
    tor_socks: Option<Arc<str>>,
}

impl Publisher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            tor_socks: None,
        }
    }

    pub fn from_settings(cfg: &Settings) -> Self {
        Self::new(cfg.publish_timeout).with_proxy(cfg.tor_socks.as_deref())
    }

    /// Route relay connections through a SOCKS5 proxy (e.g. Tor).
    pub fn with_proxy(mut self, tor_socks: Option<&str>) -> Self {
        self.tor_socks = tor_socks.map(Arc::from);
        self
    }

    /// Send `payload` to every relay concurrently and collect one outcome per
    /// distinct relay URL.
    ///
    /// Fails only when `relays` is empty; individual relay failures are
    /// reported in the returned map. No retries happen here.
    pub async fn publish(&self, payload: &str, relays: &[String]) -> Result<PublishReport> {
        if relays.is_empty() {
            return Err(Error::EmptyRelaySet);
        }
        let mut seen = HashSet::new();
        let targets: Vec<String> = relays
            .iter()
            .filter(|url| seen.insert(url.as_str()))
            .cloned()
            .collect();

        let deadline = Instant::now() + self.timeout;
        let payload: Arc<str> = Arc::from(payload);
        let mut tasks = JoinSet::new();
        for url in targets.iter().cloned() {
            let payload = payload.clone();
            let proxy = self.tor_socks.clone();
            tasks.spawn(async move {
                debug!(relay = %url, "publishing");
                let outcome = match send_once(&url, &payload, proxy.as_deref()).await {
                    Ok(reply) => RelayOutcome::Success(reply),
                    Err(e) => RelayOutcome::ConnectionFailed(format!("{e:#}")),
                };
                (url, outcome)
            });
        }

        let mut outcomes = HashMap::with_capacity(targets.len());
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((url, outcome)))) => {
                    match &outcome {
                        RelayOutcome::Success(reply) => debug!(relay = %url, %reply, "relay replied"),
                        other => warn!(relay = %url, outcome = %other, "relay publish failed"),
                    }
                    outcomes.insert(url, outcome);
                }
                Ok(Some(Err(e))) => warn!("relay task ended abnormally: {e}"),
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    break;
                }
            }
        }

        for url in targets {
            outcomes.entry(url).or_insert_with_key(|url| {
                warn!(relay = %url, "no reply before deadline");
                RelayOutcome::TimedOut
            });
        }
        Ok(PublishReport { outcomes })
    }
}

/// Connect, send one text frame, wait for one reply frame, close.
async fn send_once(relay: &str, payload: &str, tor_socks: Option<&str>) -> anyhow::Result<String> {
    let mut ws = connect_ws(relay, tor_socks).await?;
    ws.send(Message::Text(payload.to_string())).await?;
    let reply = loop {
        match ws.next().await {
            Some(Ok(Message::Text(txt))) => break txt,
            Some(Ok(Message::Binary(bin))) => break String::from_utf8_lossy(&bin).into_owned(),
            Some(Ok(Message::Close(_))) | None => bail!("relay closed the connection without replying"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    };
    // The reply is already in hand; a failed close handshake changes nothing.
    let _ = ws.close(None).await;
    Ok(reply)
}

type RelayStream = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Establish a WebSocket connection (TLS for `wss://`), optionally via a
/// SOCKS5 proxy.
async fn connect_ws(relay: &str, tor_socks: Option<&str>) -> anyhow::Result<RelayStream> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
