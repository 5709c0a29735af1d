pub mod body;
pub mod cancel;
pub mod interceptor;
pub mod message;
pub mod record;
pub mod select;
pub mod semantics;
pub mod storage;
mod tee;

pub use body::{Body, BodyTooLarge};
pub use cancel::{Cancellation, CancellationSource};
pub use interceptor::{
    CacheConfig, CacheInterceptor, DEFAULT_RESPONSE_SIZE_LIMIT, DelegateHttpClient, PushHandler,
    PushedResponse,
};
pub use message::{Request, RequestHead, Response, ResponseHead};
pub use record::{CachedResponseRecord, RecordDecodeError};
pub use select::select_stored_response;
pub use storage::{CacheStorage, MemoryStorage};
