use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};

use crate::body::Body;

/// Request line plus headers, without the body. Cheap to clone, which the
/// interceptor relies on to snapshot the request before handing it further
/// down the pipeline.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }

    pub fn header_str(&self, name: HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug)]
pub struct Request {
    pub head: RequestHead,
    pub body: Body,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            head: RequestHead::new(method, uri),
            body: Body::empty(),
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.head.headers.insert(name, value);
    }
}

/// Status line plus headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

/// A response carries the head of the request it answers. The interceptor
/// compares that head against its own snapshot to detect rewrites by
/// interceptors that ran closer to the network.
#[derive(Debug)]
pub struct Response {
    pub head: ResponseHead,
    pub body: Body,
    pub request: RequestHead,
}

impl Response {
    pub fn new(
        version: Version,
        status: StatusCode,
        reason: impl Into<String>,
        headers: HeaderMap,
        body: Body,
        request: RequestHead,
    ) -> Self {
        Self {
            head: ResponseHead {
                version,
                status,
                reason: reason.into(),
                headers,
            },
            body,
            request,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.head.headers.insert(name, value);
    }

    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, Body::empty())
    }

    pub fn into_body(self) -> Body {
        self.body
    }
}

/// Protocol version as it appears in the persisted record format.
pub(crate) fn protocol_version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}

pub(crate) fn version_from_protocol(value: &str) -> Version {
    match value {
        "0.9" => Version::HTTP_09,
        "1.0" => Version::HTTP_10,
        "2" => Version::HTTP_2,
        "3" => Version::HTTP_3,
        _ => Version::HTTP_11,
    }
}
