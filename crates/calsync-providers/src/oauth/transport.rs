//! Redirect transports that carry the authorization callback back to us.
//!
//! - [`LoopbackListener`]: a one-shot HTTP listener on `127.0.0.1`
//! - [`SchemeRegistration`]: a one-shot observer for a custom URI scheme,
//!   fed by the application's [`DeepLinkRouter`]
//!
//! Both deliver at most one callback and are torn down by `close`, which is
//! idempotent and also runs on drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use calsync_core::ProviderKind;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};
use url::Url;

use super::config::OAuthProviderConfig;
use super::pkce::CallbackParams;
use crate::error::{ProviderError, ProviderResult};

const SUCCESS_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
<html><body><h1>Authorization received</h1>\
<p>You can close this window and return to calsync.</p></body></html>";

const FAILURE_PAGE: &str = "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
<html><body><h1>Authorization failed</h1>\
<p>You can close this window.</p></body></html>";

const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Ephemeral HTTP listener for a loopback redirect.
#[derive(Debug)]
pub struct LoopbackListener {
    redirect_uri: String,
    rx: Option<oneshot::Receiver<CallbackParams>>,
    task: Option<JoinHandle<()>>,
}

impl LoopbackListener {
    /// Binds `127.0.0.1:0` and serves `/oauth/callback/<provider>`.
    pub async fn bind(provider: ProviderKind) -> ProviderResult<Self> {
        let path = format!("/oauth/callback/{}", provider.as_str());
        Self::bind_addr("127.0.0.1:0", "127.0.0.1", path).await
    }

    /// Binds the host, port and path of a fixed `http://` redirect URI.
    pub async fn bind_fixed(redirect_uri: &str) -> ProviderResult<Self> {
        let url = Url::parse(redirect_uri).map_err(|e| {
            ProviderError::configuration(format!("invalid redirect URI {redirect_uri}: {e}"))
        })?;
        let host = url.host_str().unwrap_or("127.0.0.1").to_string();
        let port = url.port_or_known_default().unwrap_or(0);
        Self::bind_addr(&format!("{host}:{port}"), &host, url.path().to_string()).await
    }

    async fn bind_addr(addr: &str, host: &str, path: String) -> ProviderResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ProviderError::internal(format!("failed to bind loopback listener on {addr}: {e}"))
                .with_source(e)
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| ProviderError::internal(format!("loopback listener has no address: {e}")))?
            .port();
        let redirect_uri = format!("http://{host}:{port}{path}");
        debug!(%redirect_uri, "loopback listener ready");

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(serve_callback(listener, path, tx));

        Ok(Self {
            redirect_uri,
            rx: Some(rx),
            task: Some(task),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    async fn recv(&mut self) -> ProviderResult<CallbackParams> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| ProviderError::authorization("loopback listener already closed"))?;
        rx.await
            .map_err(|_| ProviderError::authorization("loopback listener stopped before callback"))
    }

    /// Stops accepting connections. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(redirect_uri = %self.redirect_uri, "loopback listener closed");
        }
        self.rx = None;
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// How long a connection may take to send its request.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest request or header line read from a connection.
const MAX_LINE: u64 = 8 * 1024;
const MAX_HEADERS: usize = 100;

/// Accepts connections until one hits `path`, answers it and reports its query.
///
/// Each connection is served in its own task under a deadline, so an idle
/// preconnect socket from the browser cannot hold up the real redirect.
async fn serve_callback(
    listener: TcpListener,
    path: String,
    tx: oneshot::Sender<CallbackParams>,
) {
    let path = Arc::new(path);
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("failed to accept loopback connection: {e}");
                        continue;
                    }
                };
                debug!(%peer, "loopback connection");
                let path = path.clone();
                connections.spawn(async move {
                    match tokio::time::timeout(CONNECTION_TIMEOUT, handle_connection(stream, &path)).await {
                        Ok(params) => params,
                        Err(_) => {
                            debug!(%peer, "loopback connection timed out");
                            None
                        }
                    }
                });
            }
            Some(finished) = connections.join_next() => {
                if let Ok(Some(params)) = finished {
                    let _ = tx.send(params);
                    return;
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, path: &str) -> Option<CallbackParams> {
    let mut request_line = String::new();
    {
        let mut reader = BufReader::new(&mut stream);
        (&mut reader)
            .take(MAX_LINE)
            .read_line(&mut request_line)
            .await
            .ok()?;
        // Drain headers so closing the socket does not reset the connection.
        let mut header = String::new();
        for _ in 0..MAX_HEADERS {
            header.clear();
            match (&mut reader).take(MAX_LINE).read_line(&mut header).await {
                Ok(0) | Err(_) => break,
                Ok(_) if header.trim().is_empty() => break,
                Ok(_) => {}
            }
        }
    }

    // GET /oauth/callback/google?code=...&state=... HTTP/1.1
    let mut parts = request_line.split_whitespace();
    let method = parts.next();
    let target = parts.next().unwrap_or_default();
    let (target_path, query) = target.split_once('?').unwrap_or((target, ""));

    if method != Some("GET") || target_path != path {
        let _ = stream.write_all(NOT_FOUND.as_bytes()).await;
        return None;
    }

    let params = CallbackParams::from_query(query);
    let page = if params.error.is_some() || params.code.is_none() {
        FAILURE_PAGE
    } else {
        SUCCESS_PAGE
    };
    let _ = stream.write_all(page.as_bytes()).await;
    let _ = stream.shutdown().await;
    Some(params)
}

struct PendingScheme {
    id: u64,
    scheme: String,
    tx: oneshot::Sender<String>,
}

/// Routes incoming deep links (`<scheme>://auth?...`) to the authorization
/// flow waiting for them.
///
/// One router is owned by the application and shared by handle. It holds at
/// most one pending registration; registering again supersedes the previous
/// one.
#[derive(Clone, Default)]
pub struct DeepLinkRouter {
    pending: Arc<Mutex<Option<PendingScheme>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for DeepLinkRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepLinkRouter")
            .field("pending", &self.has_pending())
            .finish()
    }
}

impl DeepLinkRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a one-shot observer for `scheme`.
    pub fn register(&self, scheme: &str, redirect_uri: impl Into<String>) -> SchemeRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let previous = self.pending.lock().unwrap().replace(PendingScheme {
            id,
            scheme: scheme.to_ascii_lowercase(),
            tx,
        });
        if previous.is_some() {
            debug!(scheme, "superseding pending deep-link registration");
        }
        SchemeRegistration {
            router: self.clone(),
            id,
            redirect_uri: redirect_uri.into(),
            rx: Some(rx),
        }
    }

    /// Hands an incoming URL to the pending registration for its scheme.
    ///
    /// Returns `false` if nothing was waiting for it; the URL is then ignored.
    pub fn deliver(&self, url: &str) -> bool {
        let Some(scheme) = url.split_once("://").map(|(s, _)| s.to_ascii_lowercase()) else {
            return false;
        };
        let pending = {
            let mut slot = self.pending.lock().unwrap();
            match slot.as_ref() {
                Some(p) if p.scheme == scheme => slot.take(),
                _ => None,
            }
        };
        match pending {
            Some(p) => p.tx.send(url.to_string()).is_ok(),
            None => {
                debug!(%scheme, "deep link with no pending registration ignored");
                false
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    fn deregister(&self, id: u64) {
        if let Ok(mut slot) = self.pending.lock()
            && slot.as_ref().is_some_and(|p| p.id == id)
        {
            *slot = None;
        }
    }
}

/// A pending custom-scheme callback.
#[derive(Debug)]
pub struct SchemeRegistration {
    router: DeepLinkRouter,
    id: u64,
    redirect_uri: String,
    rx: Option<oneshot::Receiver<String>>,
}

impl SchemeRegistration {
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    async fn recv(&mut self) -> ProviderResult<CallbackParams> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| ProviderError::authorization("deep-link registration already closed"))?;
        let url = rx.await.map_err(|_| {
            ProviderError::authorization("deep-link registration superseded by another flow")
        })?;
        CallbackParams::from_url(&url)
    }

    /// Deregisters from the router. Safe to call more than once.
    pub fn close(&mut self) {
        if self.rx.take().is_some() {
            self.router.deregister(self.id);
        }
    }
}

impl Drop for SchemeRegistration {
    fn drop(&mut self) {
        self.close();
    }
}

/// The transport chosen for one authorization attempt.
#[derive(Debug)]
pub enum RedirectTransport {
    Loopback(LoopbackListener),
    Scheme(SchemeRegistration),
}

impl RedirectTransport {
    /// Picks the transport for `config`: its custom scheme if it has one,
    /// a fixed http redirect if configured, otherwise an ephemeral loopback port.
    pub async fn open(config: &OAuthProviderConfig, router: &DeepLinkRouter) -> ProviderResult<Self> {
        if let Some(scheme) = config.custom_scheme() {
            let redirect_uri = config.redirect_uri.clone().unwrap_or_default();
            return Ok(Self::Scheme(router.register(&scheme, redirect_uri)));
        }
        let listener = match config.redirect_uri.as_deref() {
            Some(fixed) => LoopbackListener::bind_fixed(fixed).await?,
            None => LoopbackListener::bind(config.provider).await?,
        };
        Ok(Self::Loopback(listener))
    }

    pub fn redirect_uri(&self) -> &str {
        match self {
            Self::Loopback(l) => l.redirect_uri(),
            Self::Scheme(s) => s.redirect_uri(),
        }
    }

    /// Waits for the single callback.
    pub async fn recv(&mut self) -> ProviderResult<CallbackParams> {
        match self {
            Self::Loopback(l) => l.recv().await,
            Self::Scheme(s) => s.recv().await,
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::Loopback(l) => l.close(),
            Self::Scheme(s) => s.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;

    #[tokio::test]
    async fn loopback_delivers_callback_and_ignores_other_paths() {
        let mut listener = LoopbackListener::bind(ProviderKind::Google).await.unwrap();
        let redirect = listener.redirect_uri().to_string();
        assert!(redirect.starts_with("http://127.0.0.1:"));
        assert!(redirect.ends_with("/oauth/callback/google"));

        let base = redirect.trim_end_matches("/oauth/callback/google").to_string();
        let favicon = reqwest::get(format!("{base}/favicon.ico")).await.unwrap();
        assert_eq!(favicon.status(), 404);

        let response = reqwest::get(format!("{redirect}?code=c%2F1&state=s1"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let params = listener.recv().await.unwrap();
        assert_eq!(params.code.as_deref(), Some("c/1"));
        assert_eq!(params.state.as_deref(), Some("s1"));

        listener.close();
        listener.close();
        let err = listener.recv().await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::AuthorizationFailed);
    }

    #[tokio::test]
    async fn loopback_reports_denied_consent_page() {
        let mut listener = LoopbackListener::bind(ProviderKind::Microsoft).await.unwrap();
        let response = reqwest::get(format!(
            "{}?error=access_denied&state=s",
            listener.redirect_uri()
        ))
        .await
        .unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(
            listener.recv().await.unwrap().error.as_deref(),
            Some("access_denied")
        );
    }

    #[tokio::test]
    async fn idle_connection_does_not_block_callback() {
        let mut listener = LoopbackListener::bind(ProviderKind::Google).await.unwrap();
        let redirect = listener.redirect_uri().to_string();
        let addr = redirect
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap()
            .to_string();

        // Browsers open speculative sockets that never send a request.
        let _idle = TcpStream::connect(&addr).await.unwrap();
        let mut half_line = TcpStream::connect(&addr).await.unwrap();
        half_line.write_all(b"GET /oauth/cal").await.unwrap();

        let response = reqwest::get(format!("{redirect}?code=c1&state=s1"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let params = tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .expect("callback held up by idle connection")
            .unwrap();
        assert_eq!(params.code.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn scheme_registration_receives_one_delivery() {
        let router = DeepLinkRouter::new();
        let mut registration = router.register("calsync", "calsync://auth");
        assert!(router.has_pending());

        assert!(!router.deliver("otherapp://auth?code=x"));
        assert!(router.deliver("CalSync://auth?code=c1&state=s1"));
        assert!(!router.deliver("calsync://auth?code=c2&state=s2"));

        let params = registration.recv().await.unwrap();
        assert_eq!(params.code.as_deref(), Some("c1"));
        assert!(!router.has_pending());
    }

    #[tokio::test]
    async fn closing_registration_deregisters() {
        let router = DeepLinkRouter::new();
        let mut registration = router.register("calsync", "calsync://auth");
        registration.close();
        registration.close();
        assert!(!router.has_pending());
        assert!(!router.deliver("calsync://auth?code=late"));
    }

    #[tokio::test]
    async fn dropping_registration_deregisters() {
        let router = DeepLinkRouter::new();
        drop(router.register("calsync", "calsync://auth"));
        assert!(!router.has_pending());
    }

    #[tokio::test]
    async fn new_registration_supersedes_old() {
        let router = DeepLinkRouter::new();
        let mut first = router.register("calsync", "calsync://auth");
        let mut second = router.register("calsync", "calsync://auth");

        let err = first.recv().await.unwrap_err();
        assert!(err.message().contains("superseded"));

        // The stale registration must not remove the live one.
        first.close();
        assert!(router.has_pending());

        assert!(router.deliver("calsync://auth?code=c&state=s"));
        assert_eq!(second.recv().await.unwrap().code.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn transport_selection() {
        let router = DeepLinkRouter::new();

        let scheme = OAuthProviderConfig::google(Some("id".into())).with_redirect_uri("calsync://auth");
        let transport = RedirectTransport::open(&scheme, &router).await.unwrap();
        assert!(matches!(transport, RedirectTransport::Scheme(_)));
        assert_eq!(transport.redirect_uri(), "calsync://auth");

        let loopback = OAuthProviderConfig::microsoft(Some("id".into()));
        let transport = RedirectTransport::open(&loopback, &router).await.unwrap();
        assert!(matches!(transport, RedirectTransport::Loopback(_)));
        assert!(transport.redirect_uri().ends_with("/oauth/callback/microsoft"));
    }
}
