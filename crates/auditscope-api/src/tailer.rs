use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use auditscope_types::{Credentials, Quota, RawLogRecord};

use crate::error::ApiResult;

/// One call to the tail endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TailRequest {
    /// Source identifiers, joined with commas on the wire
    pub sources: Vec<String>,

    /// Pagination cookie from the previous page
    pub cookie: Option<String>,
}

/// One page of tailed records
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TailPage {
    pub records: Vec<RawLogRecord>,

    /// Cookie for the next request, if the server issued one
    pub cookie: Option<String>,

    /// Total match count reported by the server
    pub total: u64,

    pub quota: Quota,
}

/// Something that can fetch pages of tailed logs
#[async_trait]
pub trait LogTailer: Send + Sync {
    /// Fetch the next page; must resolve to [`crate::ApiError::Cancelled`]
    /// promptly once `cancel` fires.
    async fn tail(&self, request: TailRequest, cancel: CancellationToken) -> ApiResult<TailPage>;
}

/// Builds a tailer from client-supplied credentials
pub trait TailerFactory: Send + Sync {
    fn create(&self, credentials: &Credentials) -> ApiResult<Arc<dyn LogTailer>>;
}
