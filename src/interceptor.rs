use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use http::header::{AGE, DATE, EXPIRES};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::body::{Body, BodyTooLarge, buffer_with_limit};
use crate::cancel::Cancellation;
use crate::message::{Request, RequestHead, Response, ResponseHead, version_from_protocol};
use crate::record::CachedResponseRecord;
use crate::select::select_stored_response;
use crate::semantics::parse_cache_control;
use crate::storage::{CacheStorage, RecordStore, index_ttl, primary_cache_key, push_lock_key};
use crate::tee::tee;

pub const DEFAULT_RESPONSE_SIZE_LIMIT: usize = 1024 * 1024;

/// The next hop of the pipeline: another interceptor or the transport.
#[async_trait]
pub trait DelegateHttpClient: Send + Sync {
    async fn request(&self, request: Request, cancellation: Cancellation) -> Result<Response>;
}

/// Application sink for server-pushed responses the cache has absorbed.
#[async_trait]
pub trait PushHandler: Send + Sync {
    async fn on_push(&self, request: RequestHead, response: Response);
}

/// A pushed response still being received from the connection.
pub type PushedResponse = BoxFuture<'static, Result<Response>>;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Largest body the cache will store. Larger responses are delivered but
    /// never cached.
    pub response_size_limit: usize,
    /// Whether server pushes are absorbed into the cache.
    pub store_pushed_responses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            response_size_limit: DEFAULT_RESPONSE_SIZE_LIMIT,
            store_pushed_responses: true,
        }
    }
}

/// Private response cache for a client pipeline. Cloning shares the ledgers,
/// counters and storage handle.
#[derive(Clone)]
pub struct CacheInterceptor {
    state: Arc<InterceptorState>,
}

struct InterceptorState {
    records: RecordStore,
    config: CacheConfig,
    push_handler: Option<Arc<dyn PushHandler>>,
    next_request_id: AtomicU64,
    request_count: AtomicU64,
    hit_count: AtomicU64,
    network_count: AtomicU64,
    /// Primary key -> completion signal of an in-flight store commit.
    pending_responses: Mutex<HashMap<String, watch::Receiver<()>>>,
    /// Push-lock key -> completion signal of an in-flight push absorption.
    push_locks: Mutex<HashMap<String, watch::Receiver<()>>>,
}

/// Owning side of a push-lock ledger entry. Dropping it removes the entry,
/// if still ours, and wakes every waiter by closing the channel.
struct PushLock {
    state: Arc<InterceptorState>,
    key: String,
    sender: watch::Sender<()>,
}

impl Drop for PushLock {
    fn drop(&mut self) {
        let ours = self.sender.subscribe();
        let mut locks = self.state.push_locks.lock();
        if let Some(existing) = locks.get(&self.key)
            && existing.same_channel(&ours)
        {
            locks.remove(&self.key);
        }
    }
}

impl CacheInterceptor {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self::with_config(storage, CacheConfig::default())
    }

    pub fn with_config(storage: Arc<dyn CacheStorage>, config: CacheConfig) -> Self {
        Self::build(storage, config, None)
    }

    pub fn with_push_handler(
        storage: Arc<dyn CacheStorage>,
        config: CacheConfig,
        handler: Arc<dyn PushHandler>,
    ) -> Self {
        Self::build(storage, config, Some(handler))
    }

    fn build(
        storage: Arc<dyn CacheStorage>,
        config: CacheConfig,
        push_handler: Option<Arc<dyn PushHandler>>,
    ) -> Self {
        Self {
            state: Arc::new(InterceptorState {
                records: RecordStore::new(storage),
                config,
                push_handler,
                next_request_id: AtomicU64::new(1),
                request_count: AtomicU64::new(0),
                hit_count: AtomicU64::new(0),
                network_count: AtomicU64::new(0),
                pending_responses: Mutex::new(HashMap::new()),
                push_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Requests seen by the interceptor.
    pub fn request_count(&self) -> u64 {
        self.state.request_count.load(Ordering::Relaxed)
    }

    /// Requests answered from storage.
    pub fn hit_count(&self) -> u64 {
        self.state.hit_count.load(Ordering::Relaxed)
    }

    /// Requests forwarded to the delegate.
    pub fn network_count(&self) -> u64 {
        self.state.network_count.load(Ordering::Relaxed)
    }

    /// Serves `request` from storage when a stored response qualifies,
    /// otherwise forwards it to `next` and captures the result.
    pub async fn request(
        &self,
        request: Request,
        cancellation: Cancellation,
        next: Arc<dyn DelegateHttpClient>,
    ) -> Result<Response> {
        self.state.request_count.fetch_add(1, Ordering::Relaxed);

        if self.state.config.store_pushed_responses {
            // A push in flight for this resource will populate the cache;
            // wait for it instead of racing it to the network.
            let lock = {
                let locks = self.state.push_locks.lock();
                locks.get(&push_lock_key(&request.head)).cloned()
            };
            if let Some(mut lock) = lock {
                let _ = lock.changed().await;
            }
        }

        // Snapshot before interceptors further down can rewrite the request.
        let original = request.head.clone();
        let primary_key = primary_cache_key(&original);

        let pending = {
            let pending = self.state.pending_responses.lock();
            pending.get(&primary_key).cloned()
        };
        if let Some(mut pending) = pending {
            let _ = pending.changed().await;
        }

        let records = self.state.records.load_records(&primary_key).await;
        let Some(record) = select_stored_response(&original, records) else {
            return self.fetch_fresh_response(next, request, cancellation).await;
        };

        let Some(body) = self.state.records.load_body(record.body_hash()).await else {
            return self.fetch_fresh_response(next, request, cancellation).await;
        };

        let body_intact = blake3::hash(&body).to_hex().as_str() == record.body_hash();
        if !body_intact {
            warn!(
                uri = %original.uri,
                "stored body does not match its content hash, refusing to serve it; \
                 is another cache sharing this key space?"
            );
        }

        let request_directives = parse_cache_control(&original.headers);
        let response_directives = parse_cache_control(record.headers());
        if !body_intact || request_directives.no_cache || response_directives.no_cache {
            // no-cache entries would need validation before reuse, which is
            // not supported, so they always go back to the network.
            return self.fetch_fresh_response(next, request, cancellation).await;
        }

        let age = record.age();
        let mut response = self.response_from_record(&record, original, Body::from_bytes(body));
        response.set_header(AGE, HeaderValue::from_str(&age.to_string())?);
        Ok(response)
    }

    /// Hands a server-pushed response to the cache. The push lock is held
    /// from this call until the response is stored or rejected, so requests
    /// arriving meanwhile wait instead of fetching the same resource.
    pub fn absorb_push(&self, request: RequestHead, response: PushedResponse) {
        let this = self.clone();

        if !this.state.config.store_pushed_responses {
            let Some(handler) = this.state.push_handler.clone() else {
                return;
            };
            tokio::spawn(async move {
                match response.await {
                    Ok(pushed) => handler.on_push(request, pushed).await,
                    Err(err) => debug!(error = %err, "pushed response failed"),
                }
            });
            return;
        }

        let request_time = SystemTime::now();
        let request_id = this.state.next_request_id.fetch_add(1, Ordering::Relaxed);
        let lock_key = push_lock_key(&request);
        let push_lock = {
            let mut locks = this.state.push_locks.lock();
            if locks.contains_key(&lock_key) {
                // Another push for the same resource is already in flight.
                None
            } else {
                let (sender, receiver) = watch::channel(());
                locks.insert(lock_key.clone(), receiver);
                Some(PushLock {
                    state: this.state.clone(),
                    key: lock_key,
                    sender,
                })
            }
        };

        debug!(request_id, method = %request.method, uri = %request.uri, "absorbing pushed response");

        tokio::spawn(async move {
            let pushed = match response.await {
                Ok(pushed) => pushed,
                Err(err) => {
                    debug!(request_id, error = %err, "pushed response failed");
                    return;
                }
            };

            let handler = this.state.push_handler.clone();
            if handler.is_none() && !is_cacheable(&pushed) {
                debug!(request_id, "rejecting push, response is not cacheable");
                return;
            }

            match this
                .store_response(request.clone(), pushed, request_id, request_time, push_lock)
                .await
            {
                Ok(delivered) => {
                    if let Some(handler) = handler {
                        handler.on_push(request, delivered).await;
                    }
                    // Without a handler the delivery branch is dropped here;
                    // the capture branch commits on its own.
                }
                Err(err) => debug!(request_id, error = %err, "failed to absorb pushed response"),
            }
        });
    }

    async fn fetch_fresh_response(
        &self,
        next: Arc<dyn DelegateHttpClient>,
        request: Request,
        cancellation: Cancellation,
    ) -> Result<Response> {
        let request_directives = parse_cache_control(&request.head.headers);
        if request_directives.only_if_cached {
            let mut headers = HeaderMap::new();
            headers.insert(
                DATE,
                HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now()))?,
            );
            return Ok(Response::new(
                request.head.version,
                StatusCode::GATEWAY_TIMEOUT,
                "No stored response available",
                headers,
                Body::empty(),
                request.head,
            ));
        }

        self.state.network_count.fetch_add(1, Ordering::Relaxed);

        let request_time = SystemTime::now();
        let request_id = self.state.next_request_id.fetch_add(1, Ordering::Relaxed);
        let original = request.head.clone();

        debug!(request_id, method = %original.method, uri = %original.uri, "fetching fresh response");

        let response = next.request(request, cancellation).await?;
        self.store_response(original, response, request_id, request_time, None)
            .await
    }

    fn response_from_record(
        &self,
        record: &CachedResponseRecord,
        request: RequestHead,
        body: Body,
    ) -> Response {
        self.state.hit_count.fetch_add(1, Ordering::Relaxed);
        debug!(method = %request.method, uri = %request.uri, "serving response from cache");
        Response::new(
            version_from_protocol(record.protocol_version()),
            record.status(),
            record.reason().to_string(),
            record.headers().clone(),
            body,
            request,
        )
    }

    /// Returns the caller-facing branch of `response` and commits the other
    /// branch to storage in the background. Non-cacheable and rewritten
    /// responses pass through untouched.
    async fn store_response(
        &self,
        original: RequestHead,
        mut response: Response,
        request_id: u64,
        request_time: SystemTime,
        push_lock: Option<PushLock>,
    ) -> Result<Response> {
        if !response.headers().contains_key(DATE) {
            let date = httpdate::fmt_http_date(SystemTime::now());
            response.set_header(DATE, HeaderValue::from_str(&date)?);
        }
        let response_time = SystemTime::now();

        if response.request.method != original.method || response.request.uri != original.uri {
            warn!(
                request_id,
                "request was rewritten further down the pipeline, not storing the response"
            );
            return Ok(response);
        }

        if !is_cacheable(&response) {
            debug!(
                request_id,
                status = response.status().as_u16(),
                "response is not cacheable"
            );
            return Ok(response);
        }

        let source = response.take_body().into_stream();
        let mut branches = tee(source, 2);
        let capture = branches.pop().expect("tee returns the requested branch count");
        response.body = branches.pop().expect("tee returns the requested branch count");

        let primary_key = primary_cache_key(&response.request);
        let request_head = response.request.clone();
        let response_head = response.head.clone();

        let (done_tx, done_rx) = watch::channel(());
        {
            // Insert-if-absent: a commit already in flight keeps its entry,
            // and the guarded removal below means we never evict it either.
            let mut pending = self.state.pending_responses.lock();
            pending
                .entry(primary_key.clone())
                .or_insert_with(|| done_rx.clone());
        }

        let state = self.state.clone();
        tokio::spawn(async move {
            // The push lock, when present, is held until this commit settles.
            let _push_lock = push_lock;

            let committed = commit_capture(
                &state,
                &primary_key,
                request_head,
                response_head,
                capture,
                request_time,
                response_time,
            )
            .await;
            if let Err(err) = committed {
                if err.downcast_ref::<BodyTooLarge>().is_some() {
                    debug!(request_id, key = %primary_key, "response exceeded the size limit, not stored");
                } else {
                    warn!(request_id, key = %primary_key, error = %err, "failed to store response");
                }
            }

            let mut pending = state.pending_responses.lock();
            if let Some(existing) = pending.get(&primary_key)
                && existing.same_channel(&done_rx)
            {
                pending.remove(&primary_key);
            }
            drop(pending);
            drop(done_tx);
        });

        Ok(response)
    }
}

async fn commit_capture(
    state: &InterceptorState,
    primary_key: &str,
    request: RequestHead,
    response: ResponseHead,
    capture: Body,
    request_time: SystemTime,
    response_time: SystemTime,
) -> Result<()> {
    let buffered =
        buffer_with_limit(capture.into_stream(), state.config.response_size_limit).await?;
    let body_hash = blake3::hash(&buffered).to_hex().to_string();
    let record = CachedResponseRecord::from_response(
        &request,
        &response,
        request_time,
        response_time,
        body_hash.clone(),
    );

    // Body first: the index must never point at a body that is not there.
    let ttl = index_ttl(std::slice::from_ref(&record));
    state.records.store_body(&body_hash, buffered.to_vec(), ttl).await?;

    let mut records = state.records.load_records(primary_key).await;
    records.push(record);
    state.records.store_records(primary_key, &records).await?;

    debug!(key = primary_key, bytes = buffered.len(), "stored response");
    Ok(())
}

fn is_cacheable_request_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// RFC 7231 §6.1 cacheable status codes, without 206 (no partial-response
/// support).
fn is_cacheable_response_code(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        200 | 203 | 204 | 300 | 301 | 404 | 405 | 410 | 414 | 501
    )
}

/// Whether a response may be stored at all: cacheable method and status, no
/// `no-store` on either side, and explicit freshness information.
pub(crate) fn is_cacheable(response: &Response) -> bool {
    if !is_cacheable_request_method(&response.request.method) {
        return false;
    }
    if !is_cacheable_response_code(response.status()) {
        return false;
    }
    if parse_cache_control(&response.request.headers).no_store {
        return false;
    }
    let directives = parse_cache_control(response.headers());
    if directives.no_store {
        return false;
    }
    directives.max_age.is_some() || response.headers().contains_key(EXPIRES)
}
