#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use http::header::{CACHE_CONTROL, HeaderName};
use http::{HeaderMap, HeaderValue, StatusCode, Uri, Version};
use tokio::sync::Notify;

use restash::{
    Body, CacheInterceptor, Cancellation, DelegateHttpClient, MemoryStorage, Request, Response,
};

pub fn interceptor() -> CacheInterceptor {
    CacheInterceptor::new(Arc::new(MemoryStorage::new()))
}

pub fn request() -> Request {
    Request::get(Uri::from_static("https://example.org/"))
}

/// Delegate that counts calls and answers every request with a canned
/// response. With an echo header set, the body is the value of that request
/// header, which makes Vary behavior observable.
pub struct MockClient {
    calls: AtomicU64,
    status: StatusCode,
    headers: Vec<(HeaderName, String)>,
    body: Vec<u8>,
    echo_header: Option<HeaderName>,
}

impl MockClient {
    pub fn new(cache_control: &str, body: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            status: StatusCode::OK,
            headers: vec![(CACHE_CONTROL, cache_control.to_string())],
            body: body.as_bytes().to_vec(),
            echo_header: None,
        })
    }

    pub fn with_headers(headers: Vec<(HeaderName, String)>, body: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            status: StatusCode::OK,
            headers,
            body,
            echo_header: None,
        })
    }

    pub fn echoing(header: HeaderName, headers: Vec<(HeaderName, String)>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            status: StatusCode::OK,
            headers,
            body: Vec::new(),
            echo_header: Some(header),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DelegateHttpClient for MockClient {
    async fn request(&self, request: Request, _cancellation: Cancellation) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            headers.append(name.clone(), HeaderValue::from_str(value)?);
        }
        let body = match &self.echo_header {
            Some(name) => request
                .head
                .header_str(name.clone())
                .unwrap_or("")
                .as_bytes()
                .to_vec(),
            None => self.body.clone(),
        };

        Ok(Response::new(
            Version::HTTP_11,
            self.status,
            "OK",
            headers,
            Body::from_bytes(body),
            request.head,
        ))
    }
}

/// Delegate whose body stream stalls after the first chunk until released,
/// keeping the store commit in flight for as long as the test needs.
pub struct GatedClient {
    calls: AtomicU64,
    release: Arc<Notify>,
}

impl GatedClient {
    pub fn new() -> (Arc<Self>, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        let client = Arc::new(Self {
            calls: AtomicU64::new(0),
            release: release.clone(),
        });
        (client, release)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DelegateHttpClient for GatedClient {
    async fn request(&self, request: Request, _cancellation: Cancellation) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let release = self.release.clone();
        let body = stream::unfold(0u8, move |step| {
            let release = release.clone();
            async move {
                match step {
                    0 => Some((Ok(Bytes::from_static(b"he")), 1)),
                    1 => {
                        release.notified().await;
                        Some((Ok(Bytes::from_static(b"llo")), 2))
                    }
                    _ => None,
                }
            }
        });

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        Ok(Response::new(
            Version::HTTP_11,
            StatusCode::OK,
            "OK",
            headers,
            Body::from_stream(body),
            request.head,
        ))
    }
}
