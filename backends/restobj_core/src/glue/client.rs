use std::collections::HashSet;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use restobj_config::ClientSettings;

use super::{BaseUri, ErrorTable, InstanceCache, RedirectTable, StatusClass};
use crate::document::{read_node, DocumentError, DocumentMapper, JsonMapper, NodeHandle};
use crate::errors::{HttpErrorKind, HttpStatusError, RobjError, RobjResult};
use crate::proxy::ResourceProxy;
use crate::wire::simple_http::client::{
    ConnectionSettings, DispatcherSettings, Response, TransportClient, TransportSettings,
    WaitError,
};
use crate::wire::simple_http::{
    add_header, set_header, HttpData, Payload, SimpleHeader, SimpleHeaders, SimpleMethod,
    TransportError,
};

/// Body of a POST or PUT.
#[derive(Debug)]
pub enum RequestBody {
    /// Serialized through the client's document mapper.
    Document(NodeHandle),

    /// Sent as is, with its own content type.
    Data(HttpData),
}

impl From<NodeHandle> for RequestBody {
    fn from(value: NodeHandle) -> Self {
        Self::Document(value)
    }
}

impl From<HttpData> for RequestBody {
    fn from(value: HttpData) -> Self {
        Self::Data(value)
    }
}

/// A successful response: a proxy when the body is a document, the raw
/// response otherwise.
#[derive(Debug, Clone)]
pub enum Fetched {
    Resource(ResourceProxy),
    Content(Arc<Response>),
}

impl Fetched {
    /// # Errors
    ///
    /// [`RobjError::NotADocument`] for raw content.
    pub fn into_resource(self) -> RobjResult<ResourceProxy> {
        match self {
            Self::Resource(proxy) => Ok(proxy),
            Self::Content(response) => Err(RobjError::NotADocument {
                uri: response.path.clone(),
                content_type: response.content_type(),
            }),
        }
    }

    #[must_use]
    pub fn as_resource(&self) -> Option<&ResourceProxy> {
        match self {
            Self::Resource(proxy) => Some(proxy),
            Self::Content(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,

    /// 404: someone else deleted it first.
    AlreadyGone,
}

/// Request body in a form that survives re-issuing after a redirect.
enum Prepared {
    Nothing,
    Reusable {
        bytes: Vec<u8>,
        headers: SimpleHeaders,
    },
    Once(Option<HttpData>),
}

impl Prepared {
    fn take(&mut self) -> RobjResult<(Payload, SimpleHeaders)> {
        match self {
            Self::Nothing => Ok((Payload::Empty, SimpleHeaders::new())),
            Self::Reusable { bytes, headers } => Ok((Payload::Bytes(bytes.clone()), headers.clone())),
            Self::Once(data) => {
                let data = data.take().ok_or_else(|| {
                    TransportError::BodyRead("stream body cannot be replayed after a redirect".into())
                })?;
                let mut headers = data.headers;
                set_header(&mut headers, SimpleHeader::CONTENT_TYPE, data.content_type);
                Ok((data.payload, headers))
            }
        }
    }
}

/// How a followed redirect changes the final result.
#[derive(Debug, Default)]
struct Plan {
    /// URI the returned proxy reports instead of the final target.
    report: Option<String>,
    uncached: bool,

    /// GET answered with 303: cache under the target and alias it under
    /// the original URI.
    alias: bool,
}

pub(crate) struct ClientInner {
    base: BaseUri,
    transport: TransportClient,
    mapper: Box<dyn DocumentMapper>,
    cache: InstanceCache,
    redirects: Mutex<RedirectTable>,
    errors: RwLock<ErrorTable>,
    max_redirects: usize,
}

pub(crate) type WeakClient = Weak<ClientInner>;

/// Owns the transport, the instance cache and the redirect table.
///
/// Cloning is cheap and shares all three. Proxies only hold a weak
/// reference, so once the last clone is dropped their remote operations
/// fail with [`RobjError::ClientClosed`].
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl core::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base", &self.inner.base.to_string())
            .field("transport", &self.inner.transport)
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// A client speaking JSON documents.
    ///
    /// # Errors
    ///
    /// [`RobjError::Config`] for invalid settings, [`RobjError::InvalidUri`]
    /// for a malformed base URI.
    pub fn new(settings: ClientSettings) -> RobjResult<Self> {
        Self::with_mapper(settings, JsonMapper)
    }

    /// # Errors
    ///
    /// See [`HttpClient::new`].
    pub fn with_mapper(
        settings: ClientSettings,
        mapper: impl DocumentMapper + 'static,
    ) -> RobjResult<Self> {
        settings.validate()?;
        if settings.logging {
            restobj_logs::setup_logging(tracing::Level::INFO);
        }

        let base = BaseUri::parse(&settings.base_uri)?;
        let transport = TransportClient::new(base.url(), transport_settings(&settings));
        restobj_logs::info!("Created client for {}", base);

        Ok(Self {
            inner: Arc::new(ClientInner {
                base,
                transport,
                mapper: Box::new(mapper),
                cache: InstanceCache::new(),
                redirects: Mutex::new(RedirectTable::default()),
                errors: RwLock::new(ErrorTable::new()),
                max_redirects: settings.max_redirects,
            }),
        })
    }

    pub(crate) fn downgrade(&self) -> WeakClient {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &WeakClient) -> RobjResult<Self> {
        weak.upgrade()
            .map(|inner| Self { inner })
            .ok_or(RobjError::ClientClosed)
    }

    #[must_use]
    pub fn base(&self) -> &BaseUri {
        &self.inner.base
    }

    #[must_use]
    pub fn cache(&self) -> &InstanceCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn mapper(&self) -> &dyn DocumentMapper {
        self.inner.mapper.as_ref()
    }

    #[must_use]
    pub fn transport(&self) -> &TransportClient {
        &self.inner.transport
    }

    /// # Errors
    ///
    /// See [`BaseUri::normalize`].
    pub fn normalize(&self, uri: &str) -> RobjResult<String> {
        self.inner.base.normalize(uri)
    }

    /// # Errors
    ///
    /// See [`BaseUri::normalize`].
    pub fn clear_cache(&self, uri: Option<&str>) -> RobjResult<()> {
        match uri {
            Some(uri) => self.inner.cache.clear(Some(&self.normalize(uri)?)),
            None => self.inner.cache.clear(None),
        }
        Ok(())
    }

    /// Stop mapping `status` to an error; such responses are handled as
    /// successes.
    pub fn suppress_status(&self, status: u16) {
        self.errors_mut().suppress(status);
    }

    pub fn restore_status(&self, status: u16) {
        self.errors_mut().restore(status);
    }

    /// Where a `301` has permanently moved `uri`, if anywhere.
    #[must_use]
    pub fn permanent_redirect(&self, uri: &str) -> Option<String> {
        let uri = self.normalize(uri).ok()?;
        self.redirects().target(&uri).map(str::to_string)
    }

    fn redirects(&self) -> MutexGuard<'_, RedirectTable> {
        self.inner.redirects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn errors(&self) -> RwLockReadGuard<'_, ErrorTable> {
        self.inner.errors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn errors_mut(&self) -> RwLockWriteGuard<'_, ErrorTable> {
        self.inner.errors.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The resource at the base URI, base query included.
    ///
    /// # Errors
    ///
    /// Any request failure, or [`RobjError::NotADocument`].
    pub fn root(&self) -> RobjResult<ResourceProxy> {
        self.do_get(&self.inner.base.root())
    }

    /// GET through the instance cache.
    ///
    /// # Errors
    ///
    /// Any request failure, or [`RobjError::NotADocument`].
    pub fn do_get(&self, uri: &str) -> RobjResult<ResourceProxy> {
        self.fetch(uri, None, true)?.into_resource()
    }

    /// GET that may return raw content; `use_cache = false` always goes
    /// to the server and recaches the result.
    ///
    /// # Errors
    ///
    /// Transport, status and redirect errors.
    pub fn fetch(
        &self,
        uri: &str,
        parent: Option<&ResourceProxy>,
        use_cache: bool,
    ) -> RobjResult<Fetched> {
        self.handle_request(SimpleMethod::GET, uri, None, parent, use_cache)
    }

    /// # Errors
    ///
    /// Transport, status and redirect errors, or
    /// [`RobjError::Serialization`] for an untagged document.
    pub fn do_post(
        &self,
        uri: &str,
        body: impl Into<RequestBody>,
        parent: Option<&ResourceProxy>,
    ) -> RobjResult<Fetched> {
        self.handle_request(SimpleMethod::POST, uri, Some(body.into()), parent, false)
    }

    /// # Errors
    ///
    /// See [`HttpClient::do_post`].
    pub fn do_put(&self, uri: &str, body: impl Into<RequestBody>) -> RobjResult<Fetched> {
        self.handle_request(SimpleMethod::PUT, uri, Some(body.into()), None, false)
    }

    /// DELETE `uri`. `200` and `404` both succeed and drop the cache entry.
    ///
    /// # Errors
    ///
    /// [`RobjError::Delete`] for any other status, transport failures.
    pub fn do_delete(&self, uri: &str) -> RobjResult<DeleteOutcome> {
        let original = self.normalize(uri)?;
        let (target, _) = self.redirects().resolve(&original, self.inner.max_redirects)?;

        let (_, response) = self.send(SimpleMethod::DELETE, &target, &mut Prepared::Nothing)?;
        let outcome = match response.status {
            200 => DeleteOutcome::Deleted,
            404 => DeleteOutcome::AlreadyGone,
            status if self.errors().is_suppressed(status) => DeleteOutcome::Deleted,
            status => {
                return Err(RobjError::Delete(HttpStatusError {
                    kind: HttpErrorKind::from_status(status).unwrap_or(HttpErrorKind::ClientError),
                    method: SimpleMethod::DELETE.to_string(),
                    uri: target,
                    status,
                    reason: response.reason.clone(),
                }))
            }
        };

        self.inner.cache.clear(Some(&target));
        self.inner.cache.clear(Some(&original));
        Ok(outcome)
    }

    fn prepare(&self, body: Option<RequestBody>) -> RobjResult<Prepared> {
        Ok(match body {
            None => Prepared::Nothing,
            Some(RequestBody::Document(node)) => {
                let bytes = self.inner.mapper.serialize(&node, None).map_err(|err| match err {
                    DocumentError::MissingTag => RobjError::Serialization(
                        "document has no tag to serialize under".into(),
                    ),
                    other => RobjError::Document(other),
                })?;
                let mut headers = SimpleHeaders::new();
                set_header(&mut headers, SimpleHeader::CONTENT_TYPE, self.inner.mapper.media_type());
                Prepared::Reusable { bytes, headers }
            }
            Some(RequestBody::Data(data)) => match data.payload {
                Payload::Bytes(bytes) => {
                    let mut headers = data.headers;
                    set_header(&mut headers, SimpleHeader::CONTENT_TYPE, data.content_type);
                    Prepared::Reusable { bytes, headers }
                }
                Payload::Empty => {
                    let mut headers = data.headers;
                    set_header(&mut headers, SimpleHeader::CONTENT_TYPE, data.content_type);
                    Prepared::Reusable {
                        bytes: Vec::new(),
                        headers,
                    }
                }
                payload @ Payload::Stream { .. } => Prepared::Once(Some(HttpData { payload, ..data })),
            },
        })
    }

    fn send(
        &self,
        method: SimpleMethod,
        uri: &str,
        body: &mut Prepared,
    ) -> RobjResult<(url::Url, Arc<Response>)> {
        let url = self.inner.base.absolute(uri)?;
        let (payload, mut headers) = body.take()?;
        if !headers.contains_key(&SimpleHeader::ACCEPT) {
            add_header(&mut headers, SimpleHeader::ACCEPT, self.inner.mapper.media_type());
        }

        restobj_logs::traffic!("{} {}", method, uri);
        let response = self
            .inner
            .transport
            .request(method, &url, headers, payload)
            .map_err(|err| match err {
                WaitError::TimedOut(waited) => RobjError::ResponseTimeout {
                    method: method.to_string(),
                    uri: uri.to_string(),
                    waited,
                },
                WaitError::Failed(err) => RobjError::Transport(err),
            })?;
        restobj_logs::traffic!(
            "{} {} -> {} {} ({} bytes)",
            method,
            uri,
            response.status,
            response.reason,
            response.body.len()
        );
        Ok((url, response))
    }

    fn handle_request(
        &self,
        method: SimpleMethod,
        uri: &str,
        body: Option<RequestBody>,
        parent: Option<&ResourceProxy>,
        use_cache: bool,
    ) -> RobjResult<Fetched> {
        let max = self.inner.max_redirects;
        let original = self.normalize(uri)?;
        let (mut target, mut hops) = self.redirects().resolve(&original, max)?;

        let requested = method;
        let mut method = method;
        let mut use_cache = use_cache;
        let mut body = self.prepare(body)?;
        let mut plan = Plan::default();
        let mut visited = HashSet::from([(method, target.clone())]);

        loop {
            if method == SimpleMethod::GET && use_cache && !plan.uncached {
                if let Some(hit) = self.inner.cache.get(&target) {
                    return Ok(Fetched::Resource(self.alias_hit(hit, &plan, parent)));
                }
            }

            let (url, response) = self.send(method, &target, &mut body)?;
            let status = response.status;
            if self.errors().classify(status) != StatusClass::Redirect {
                self.errors()
                    .check(&method.to_string(), &target, status, &response.reason)?;
                return self.finish(method, response, &target, &plan, parent);
            }

            let next = match status {
                300 | 305 | 306 => {
                    return Err(RobjError::UnhandledRedirect { uri: target, status })
                }
                304 => {
                    if let Some(hit) = self.inner.cache.get(&target) {
                        return Ok(Fetched::Resource(hit));
                    }
                    use_cache = false;
                    plan.report = Some(original.clone());
                    plan.uncached = true;
                    target.clone()
                }
                301 | 302 | 303 | 307 => {
                    let location = response.header("Location").ok_or_else(|| {
                        RobjError::MissingLocation {
                            uri: target.clone(),
                            status,
                        }
                    })?;
                    let next = self.inner.base.resolve_location(&url, location)?;
                    match status {
                        301 => {
                            self.redirects().record(target.clone(), next.clone());
                        }
                        302 => {
                            method = SimpleMethod::GET;
                            body = Prepared::Nothing;
                            plan.uncached = true;
                            plan.report = Some(original.clone());
                        }
                        303 if requested == SimpleMethod::GET => {
                            body = Prepared::Nothing;
                            plan.alias = true;
                            plan.report = Some(original.clone());
                        }
                        // a write answered with 303 points at the created
                        // or updated resource, not at an alias of `original`
                        303 => {
                            method = SimpleMethod::GET;
                            body = Prepared::Nothing;
                            plan.alias = false;
                            plan.report = None;
                        }
                        _ => {
                            plan.uncached = true;
                            plan.report = Some(original.clone());
                        }
                    }
                    let (next, moved) = self.redirects().resolve(&next, max)?;
                    hops += moved;
                    next
                }
                _ => return Err(RobjError::UnknownRedirect { uri: target, status }),
            };

            hops += 1;
            let looped = status != 304 && !visited.insert((method, next.clone()));
            if hops > max || looped {
                return Err(RobjError::MaxRedirects { uri: original, hops });
            }
            restobj_logs::debug!("{} redirected {} to {} ({} hops)", status, target, next, hops);
            target = next;
        }
    }

    /// A cache hit reached through a 303 is still reported under the
    /// original URI.
    fn alias_hit(
        &self,
        hit: ResourceProxy,
        plan: &Plan,
        parent: Option<&ResourceProxy>,
    ) -> ResourceProxy {
        match (&plan.report, plan.alias) {
            (Some(original), true) => match hit.root_node() {
                Ok(node) => self.inner.cache.cache(self, original, node, parent),
                Err(_) => hit,
            },
            _ => hit,
        }
    }

    fn finish(
        &self,
        method: SimpleMethod,
        response: Arc<Response>,
        target: &str,
        plan: &Plan,
        parent: Option<&ResourceProxy>,
    ) -> RobjResult<Fetched> {
        let Some(node) = self.parse_body(&response)? else {
            return Ok(Fetched::Content(response));
        };

        let discovered = read_node(&node)
            .scalar("id")
            .and_then(|id| self.normalize(id).ok());
        let key = discovered.clone().unwrap_or_else(|| target.to_string());
        let cache = &self.inner.cache;

        let proxy = match &plan.report {
            Some(original) if plan.alias => {
                cache.cache(self, &key, node.clone(), parent);
                cache.cache(self, original, node, parent)
            }
            Some(original) => ResourceProxy::new(self, original, node, parent),
            None if discovered.is_none() && method == SimpleMethod::POST => {
                ResourceProxy::new(self, target, node, parent)
            }
            None => {
                if key != target {
                    restobj_logs::debug!("Caching {} under its id {}", target, key);
                }
                cache.cache(self, &key, node, parent)
            }
        };
        Ok(Fetched::Resource(proxy))
    }

    fn parse_body(&self, response: &Response) -> RobjResult<Option<NodeHandle>> {
        if response.body.is_empty() {
            return Ok(None);
        }
        let mapper = self.inner.mapper.as_ref();
        match response.content_type() {
            Some(content_type) if mapper.accepts(&content_type) => {
                Ok(Some(mapper.parse(&response.body)?))
            }
            Some(_) => Ok(None),
            None => Ok(mapper.parse(&response.body).ok()),
        }
    }
}

fn transport_settings(settings: &ClientSettings) -> TransportSettings {
    let mut headers = SimpleHeaders::new();
    for (name, value) in &settings.headers {
        add_header(&mut headers, name.as_str(), value.clone());
    }

    TransportSettings {
        dispatcher: DispatcherSettings {
            max_clients: settings.max_clients,
            max_connections: settings.max_connections,
            threaded: settings.threaded,
            connection: ConnectionSettings {
                connect_timeout: settings.connect_timeout,
                read_timeout: settings.read_timeout,
                idle_timeout: settings.idle_timeout,
            },
        },
        headers,
        retries: settings.request_retries,
        retry_backoff: settings.retry_backoff,
        wait_timeout: settings.wait_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Node;

    fn client() -> HttpClient {
        HttpClient::new(ClientSettings::new("http://localhost:1/api").with_threaded(false))
            .expect("client")
    }

    #[test]
    fn test_rejects_invalid_settings() {
        assert!(matches!(
            HttpClient::new(ClientSettings::default()),
            Err(RobjError::Config(_))
        ));
        assert!(matches!(
            HttpClient::new(ClientSettings::new("not a url")),
            Err(RobjError::InvalidUri { .. })
        ));
    }

    #[test]
    fn test_untagged_document_is_a_serialization_error() {
        let client = client();
        let result = client.prepare(Some(RequestBody::Document(Node::untagged().into_handle())));
        assert!(matches!(result, Err(RobjError::Serialization(_))));
    }

    /// WHY: Stream bodies are read once, so a redirect cannot resend them
    /// WHAT: The second take of a stream body fails instead of sending nothing
    #[test]
    fn test_stream_body_is_taken_once() {
        let client = client();
        let data = HttpData::stream(std::io::Cursor::new(b"abc".to_vec()), Some(3), "text/plain");
        let mut prepared = client
            .prepare(Some(RequestBody::Data(data)))
            .expect("prepares");

        let (payload, headers) = prepared.take().expect("first take");
        assert!(matches!(payload, Payload::Stream { .. }));
        assert_eq!(
            crate::wire::simple_http::first_header(&headers, &SimpleHeader::CONTENT_TYPE),
            Some("text/plain")
        );
        assert!(matches!(
            prepared.take(),
            Err(RobjError::Transport(TransportError::BodyRead(_)))
        ));
    }

    #[test]
    fn test_proxies_outlive_their_client_only_as_data() {
        let client = client();
        let weak = client.downgrade();
        assert!(HttpClient::upgrade(&weak).is_ok());
        drop(client);
        assert!(matches!(HttpClient::upgrade(&weak), Err(RobjError::ClientClosed)));
    }
}
