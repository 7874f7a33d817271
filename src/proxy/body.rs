//! Message bodies handed between the proxy engine and the hooks
//!
//! A body can be read only once. Hooks that capture it drain it fully into
//! memory and hand the engine a fresh body over the same bytes.

use std::error::Error as StdError;
use std::pin::Pin;
use std::task::{Context, Poll};

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Frame};
use hyper::header::HeaderMap;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Body type of every message passing through the hooks
pub type ProxyBody = BoxBody<Bytes, BoxError>;

/// Body over an in-memory buffer
pub fn full(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never| -> BoxError { match never {} })
        .boxed()
}

pub fn empty() -> ProxyBody {
    full(Bytes::new())
}

/// Complete contents of a drained body
#[derive(Debug, Clone, Default)]
pub struct DrainedBody {
    pub bytes: Bytes,
    pub trailers: Option<HeaderMap>,
}

/// Read a body to its end, keeping data and trailers
pub async fn drain(body: ProxyBody) -> Result<DrainedBody, BoxError> {
    let collected = body.collect().await?;
    let trailers = collected.trailers().cloned();
    Ok(DrainedBody {
        bytes: collected.to_bytes(),
        trailers,
    })
}

/// Fresh body over drained contents
pub fn restore(drained: DrainedBody) -> ProxyBody {
    let body = Full::new(drained.bytes).map_err(|never| -> BoxError { match never {} });
    match drained.trailers {
        Some(trailers) => body
            .with_trailers(std::future::ready(Some(Ok(trailers))))
            .boxed(),
        None => body.boxed(),
    }
}

/// Body that yields a single error
///
/// Stands in for a body whose drain failed, so the engine sees the failure
/// when it forwards the message.
pub fn failed(error: BoxError) -> ProxyBody {
    FailedBody { error: Some(error) }.boxed()
}

struct FailedBody {
    error: Option<BoxError>,
}

impl Body for FailedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.error.take().map(Err))
    }

    fn is_end_stream(&self) -> bool {
        self.error.is_none()
    }
}
