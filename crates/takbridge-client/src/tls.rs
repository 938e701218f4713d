use crate::client::{ClientConfig, ClientEvent, ClientEvents, ClientFactory, ClientHandle, TakClient};
use crate::inbound::{process_frame, ReceiveBuffer};
use crate::state::{ClientState, ConnectionState};
use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig as RustlsConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use takbridge_core::config::{AppConfig, ClientSettings, ServerSettings};
use takbridge_core::error::{CertificateError, ConnectionError, TimeoutError};
use takbridge_core::{ConnectionAuth, ConnectionId, Result, TakBridgeError, TakServerUrl};
use takbridge_cot::{encode, ping};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, instrument, trace, warn};

/// Initial capacity of the socket read buffer
const READ_CHUNK: usize = 8192;

/// Configuration specific to the TLS client
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Base client configuration
    pub base: ClientConfig,
    /// Verify the server certificate chain and name.
    ///
    /// TAK servers commonly present certificates from a private CA, so this
    /// is off unless configured.
    pub verify_server: bool,
    /// CA bundle used when `verify_server` is set; the webpki roots otherwise
    pub ca_cert: Option<PathBuf>,
}

impl TlsClientConfig {
    pub fn from_settings(server: &ServerSettings, client: &ClientSettings) -> Self {
        Self {
            base: ClientConfig::from(client),
            verify_server: server.verify_server,
            ca_cert: server.ca_cert.clone(),
        }
    }
}

impl From<&AppConfig> for TlsClientConfig {
    fn from(config: &AppConfig) -> Self {
        Self::from_settings(&config.server, &config.client)
    }
}

/// Builds the rustls configuration for one connection's credentials.
///
/// # Errors
///
/// Returns a `CertificateError` when the certificate or key is missing or
/// does not decode, or when the CA bundle cannot be loaded.
pub fn build_tls_config(auth: &ConnectionAuth, config: &TlsClientConfig) -> Result<RustlsConfig> {
    auth.validate()?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut auth.cert.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CertificateError::invalid_pem("certificate", e.to_string()))?;
    if certs.is_empty() {
        return Err(CertificateError::invalid_pem("certificate", "no CERTIFICATE block found").into());
    }

    let key = rustls_pemfile::private_key(&mut auth.key.as_bytes())
        .map_err(|e| CertificateError::invalid_pem("private key", e.to_string()))?
        .ok_or_else(|| CertificateError::invalid_pem("private key", "no private key block found"))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = RustlsConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| TakBridgeError::Internal(format!("TLS protocol setup failed: {}", e)))?;

    let builder = if config.verify_server {
        builder.with_root_certificates(root_store(config.ca_cert.as_deref())?)
    } else {
        warn!("Server certificate verification is DISABLED - this is insecure!");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
    };

    builder.with_client_auth_cert(certs, key).map_err(|e| {
        CertificateError::InvalidClientAuth {
            reason: e.to_string(),
        }
        .into()
    })
}

fn root_store(ca_cert: Option<&Path>) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();

    match ca_cert {
        Some(path) => {
            let file = std::fs::File::open(path).map_err(|e| ca_error(path, e))?;
            let mut reader = BufReader::new(file);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| ca_error(path, e))?;
                store.add(cert).map_err(|e| ca_error(path, e))?;
            }
            if store.is_empty() {
                return Err(ca_error(path, "no certificates found"));
            }
            info!(path = %path.display(), count = store.len(), "Loaded custom CA certificates");
        }
        None => {
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            debug!("Using webpki root certificates");
        }
    }

    Ok(store)
}

fn ca_error(path: &Path, reason: impl ToString) -> TakBridgeError {
    CertificateError::InvalidCaBundle {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Accepts any server certificate. Handshake signatures are still checked,
/// so the server must hold the key for whatever certificate it presents.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

struct Session {
    task: JoinHandle<()>,
    outbound: mpsc::Sender<String>,
}

/// TLS client for one TAK server connection.
///
/// Each session runs on its own task, which owns the socket and the
/// keep-alive timer. Aborting the task stops both.
pub struct TlsClient {
    id: ConnectionId,
    url: TakServerUrl,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    config: ClientConfig,
    state: Arc<ClientState>,
    events: mpsc::Sender<ClientEvent>,
    session: Mutex<Option<Session>>,
}

impl TlsClient {
    /// Validates the inputs and starts the first session.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails for a non-`ssl` URL and for missing or malformed credentials.
    /// Network failures arrive later as [`ClientEvent::Error`].
    pub fn connect(
        id: ConnectionId,
        url: &str,
        auth: &ConnectionAuth,
        config: TlsClientConfig,
    ) -> Result<(Arc<Self>, ClientEvents)> {
        let url = TakServerUrl::parse(url)?;
        let tls_config = build_tls_config(auth, &config)?;
        let server_name = ServerName::try_from(url.host().to_string())
            .map_err(|e| ConnectionError::invalid_url(url.to_string(), e.to_string()))?;

        let (events_tx, events_rx) = mpsc::channel(config.base.channel_capacity.max(1));

        let client = Arc::new(Self {
            id,
            url,
            server_name,
            connector: TlsConnector::from(Arc::new(tls_config)),
            config: config.base,
            state: Arc::new(ClientState::new()),
            events: events_tx,
            session: Mutex::new(None),
        });
        client.start_session();

        Ok((client, events_rx))
    }

    pub fn url(&self) -> &TakServerUrl {
        &self.url
    }

    pub fn client_state(&self) -> &ClientState {
        &self.state
    }

    fn start_session(&self) {
        let Some(session) = self.state.begin_session() else {
            return;
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        // The handshake ping is the first thing written on every session
        let _ = outbound_tx.try_send(encode(&ping()));

        let ctx = SessionContext {
            id: self.id,
            url: self.url.clone(),
            server_name: self.server_name.clone(),
            connector: self.connector.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            session,
        };
        let task = tokio::spawn(ctx.run(outbound_rx));

        let previous = self.session.lock().replace(Session {
            task,
            outbound: outbound_tx,
        });
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }
}

#[async_trait]
impl TakClient for TlsClient {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn reconnect(&self) -> Result<()> {
        if self.state.is_destroyed() {
            debug!(connection_id = %self.id, "Ignoring reconnect of destroyed client");
            return Ok(());
        }
        info!(connection_id = %self.id, server = %self.url, "Reconnecting");
        self.start_session();
        Ok(())
    }

    fn destroy(&self) {
        if !self.state.mark_destroyed() {
            return;
        }
        if let Some(session) = self.session.lock().take() {
            session.task.abort();
        }
        debug!(connection_id = %self.id, "Client destroyed");
    }

    async fn write_xml(&self, body: String) -> Result<()> {
        if self.state.is_destroyed() {
            return Err(ConnectionError::Destroyed.into());
        }
        let outbound = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.outbound.clone())
            .ok_or(ConnectionError::NotConnected)?;

        outbound
            .send(body)
            .await
            .map_err(|_| ConnectionError::NotConnected.into())
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn is_destroyed(&self) -> bool {
        self.state.is_destroyed()
    }

    fn server_version(&self) -> Option<String> {
        self.state.server_version()
    }

    fn state(&self) -> ConnectionState {
        self.state.state()
    }
}

impl Drop for TlsClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.task.abort();
        }
    }
}

/// Everything a session task needs, detached from the client handle.
struct SessionContext {
    id: ConnectionId,
    url: TakServerUrl,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    config: ClientConfig,
    state: Arc<ClientState>,
    events: mpsc::Sender<ClientEvent>,
    session: u64,
}

impl SessionContext {
    #[instrument(name = "tak_session", skip_all, fields(connection_id = %self.id, server = %self.url, session = self.session))]
    async fn run(self, outbound: mpsc::Receiver<String>) {
        debug!("Connecting");

        let end = match self.open_stream().await {
            Ok(stream) => {
                info!("TLS handshake successful");
                self.pump(stream, outbound).await
            }
            Err(e) => ClientEvent::Error(e),
        };

        if !self.state.end_session(self.session) {
            return;
        }

        match &end {
            ClientEvent::End => info!("Server closed the connection"),
            ClientEvent::Timeout => warn!(
                timeout_secs = self.config.read_timeout.as_secs(),
                "No data from server; timing out"
            ),
            ClientEvent::Error(e) => warn!(error = %e, "Session failed"),
            _ => {}
        }
        let _ = self.events.send(end).await;
    }

    async fn open_stream(&self) -> Result<TlsStream<TcpStream>> {
        let host = self.url.host();
        let port = self.url.port();
        let timeout_secs = self.config.connect_timeout.as_secs();

        let tcp = timeout(self.config.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TimeoutError::ConnectTimeout { timeout_secs })?
            .map_err(|e| ConnectionError::failed(host, port, e.to_string()))?;

        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        timeout(
            self.config.connect_timeout,
            self.connector.connect(self.server_name.clone(), tcp),
        )
        .await
        .map_err(|_| TimeoutError::HandshakeTimeout { timeout_secs })?
        .map_err(|e| ConnectionError::tls_handshake_failed(e.to_string()).into())
    }

    /// Drives an established session until it ends; returns the terminal
    /// event to report.
    async fn pump(
        &self,
        stream: TlsStream<TcpStream>,
        mut outbound: mpsc::Receiver<String>,
    ) -> ClientEvent {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut read_buf = BytesMut::with_capacity(READ_CHUNK);
        let mut frames = ReceiveBuffer::new(self.config.max_buffer_bytes);

        let period = self.config.ping_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let idle = sleep(self.config.read_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                read = reader.read_buf(&mut read_buf) => {
                    let n = match read {
                        Ok(0) => return ClientEvent::End,
                        Ok(n) => n,
                        // Peer dropped the socket without close_notify
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            return ClientEvent::End;
                        }
                        Err(e) => return ClientEvent::Error(e.into()),
                    };
                    idle.as_mut().reset(Instant::now() + self.config.read_timeout);
                    self.state.metrics().record_bytes_received(n as u64);
                    trace!(bytes = n, "Received data");

                    frames.push(&read_buf);
                    read_buf.clear();

                    while let Some(frame) = frames.next_frame() {
                        if let Some(event) = process_frame(&frame, &self.state, self.session, self.id) {
                            if !self.emit(event).await {
                                return ClientEvent::End;
                            }
                        }
                    }

                    if frames.is_overflowing() {
                        return ClientEvent::Error(
                            ConnectionError::BufferOverflow { limit: frames.limit() }.into(),
                        );
                    }
                }
                Some(body) = outbound.recv() => {
                    if let Err(e) = self.write_frame(&mut writer, &body).await {
                        return ClientEvent::Error(e);
                    }
                }
                _ = keepalive.tick() => {
                    trace!("Sending keep-alive ping");
                    if let Err(e) = self.write_frame(&mut writer, &encode(&ping())).await {
                        return ClientEvent::Error(e);
                    }
                }
                _ = &mut idle => {
                    return ClientEvent::Timeout;
                }
            }
        }
    }

    /// Writes one frame followed by a newline.
    async fn write_frame<W>(&self, writer: &mut W, body: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let timeout_secs = self.config.write_timeout.as_secs();
        let write = async {
            writer.write_all(body.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };

        timeout(self.config.write_timeout, write)
            .await
            .map_err(|_| TimeoutError::WriteTimeout { timeout_secs })??;

        self.state.metrics().record_bytes_sent(body.len() as u64 + 1);
        Ok(())
    }

    /// Hands an event to the owner. Returns false once nobody should hear
    /// from this session any more.
    async fn emit(&self, event: ClientEvent) -> bool {
        if !self.state.is_current(self.session) {
            return false;
        }
        self.events.send(event).await.is_ok()
    }
}

/// Creates [`TlsClient`]s for the pool.
#[derive(Debug, Clone, Default)]
pub struct TlsClientFactory {
    config: TlsClientConfig,
}

impl TlsClientFactory {
    pub fn new(config: TlsClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TlsClientConfig {
        &self.config
    }
}

impl ClientFactory for TlsClientFactory {
    fn connect(&self, id: ConnectionId, url: &str, auth: &ConnectionAuth) -> Result<ClientHandle> {
        let (client, events) = TlsClient::connect(id, url, auth, self.config.clone())?;
        Ok(ClientHandle { client, events })
    }
}
