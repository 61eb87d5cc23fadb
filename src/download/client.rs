//! Per-worker HTTP client bound to one origin.
//!
//! A worker keeps exactly one client alive, keyed by (scheme, host, port).
//! Switching origins drops the old client (closing its connection) and
//! builds a fresh one. Addresses come from the shared DNS cache, injected
//! into the client so reqwest never resolves on its own; the cookie jar is
//! shared process-wide so Set-Cookie survives connection turnover.

use std::sync::Arc;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::redirect;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::download::error::FetchError;
use crate::queue::job::HostKey;
use crate::resolver::{DnsCache, ResolveOptions};

/// One worker's connection to the world.
pub struct HttpClient {
    cfg: Arc<Config>,
    dns: Arc<DnsCache>,
    jar: Arc<reqwest::cookie::Jar>,
    conn: Option<(HostKey, Client)>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("connected_to", &self.conn.as_ref().map(|(k, _)| k.to_string()))
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(cfg: Arc<Config>, dns: Arc<DnsCache>, jar: Arc<reqwest::cookie::Jar>) -> Self {
        Self {
            cfg,
            dns,
            jar,
            conn: None,
        }
    }

    /// The origin of the currently held connection, if any.
    #[must_use]
    pub fn current_origin(&self) -> Option<&HostKey> {
        self.conn.as_ref().map(|(k, _)| k)
    }

    /// Returns a client connected to `key`, reusing the held one when the
    /// origin matches.
    ///
    /// # Errors
    ///
    /// DNS failures surface as [`FetchError::Dns`]; client construction
    /// failures as [`FetchError::Protocol`].
    pub fn client_for(&mut self, key: &HostKey) -> Result<&Client, FetchError> {
        let reusable = self.conn.as_ref().is_some_and(|(held, _)| held == key);
        if !reusable {
            if let Some((old, _)) = self.conn.take() {
                debug!(from = %old, to = %key, "switching origin, dropping connection");
            }
            let client = self.build_client(key)?;
            self.conn = Some((key.clone(), client));
        }
        match &self.conn {
            Some((_, client)) => Ok(client),
            None => Err(FetchError::protocol(key.to_string(), "no client built")),
        }
    }

    fn build_client(&self, key: &HostKey) -> Result<Client, FetchError> {
        let addrs = self
            .dns
            .resolve(&key.host, key.port, &ResolveOptions::default())
            .map_err(|e| FetchError::dns(key.host.clone(), e))?;

        let mut builder = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(self.cfg.user_agent.clone())
            .cookie_provider(Arc::clone(&self.jar))
            .resolve_to_addrs(&key.host, addrs.as_slice())
            .pool_max_idle_per_host(1);
        if let Some(t) = self.cfg.connect_timeout.as_duration() {
            builder = builder.connect_timeout(t);
        }
        if let Some(t) = self.cfg.read_timeout.as_duration() {
            builder = builder.timeout(t);
        }
        if !self.cfg.compression {
            builder = builder.no_gzip();
        }
        builder
            .build()
            .map_err(|e| FetchError::protocol(key.to_string(), e.to_string()))
    }

    /// Starts a request with the standard headers applied.
    ///
    /// # Errors
    ///
    /// Same as [`Self::client_for`].
    pub fn request(
        &mut self,
        method: reqwest::Method,
        url: &Url,
        referer: Option<&Url>,
    ) -> Result<RequestBuilder, FetchError> {
        let key = HostKey::from_url(url).ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        let cfg = Arc::clone(&self.cfg);
        let client = self.client_for(&key)?;

        let mut request = client.request(method, url.clone()).header("Accept", "*/*");
        if let Some(lang) = &cfg.accept_language {
            request = request.header("Accept-Language", lang.clone());
        }
        match referer {
            Some(r) => request = request.header("Referer", r.to_string()),
            None => {
                if let Some(r) = &cfg.referer {
                    request = request.header("Referer", r.clone());
                }
            }
        }
        for (name, value) in &cfg.headers {
            request = request.header(name.clone(), value.clone());
        }
        Ok(request)
    }
}
