//! Response body wrapper that writes the request log entry once the
//! upstream body has been fully relayed.

use crate::metrics;
use crate::request_log::{LogEntry, LogOutcome, RequestLog};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::warn;

/// Log record waiting for the response to finish
pub(crate) struct PendingEntry {
    pub log: Arc<RequestLog>,
    pub port: u16,
    pub method: String,
    pub path: String,
    pub target_url: String,
    pub started: Instant,
    pub status: u16,
}

impl PendingEntry {
    fn finish(self, body_error: Option<String>) {
        let elapsed = self.started.elapsed();
        let duration_ms = elapsed.as_secs_f64() * 1000.0;
        let outcome = match body_error {
            None => {
                metrics::record_completed(self.port, self.status, duration_ms);
                LogOutcome::Completed {
                    status_code: self.status,
                }
            }
            Some(message) => {
                warn!(
                    "[{}] {} {} aborted mid-response: {}",
                    self.port, self.method, self.path, message
                );
                metrics::record_failed(self.port, "partial_response", duration_ms);
                LogOutcome::Failed {
                    error_message: message,
                }
            }
        };
        self.log.append(LogEntry::new(
            self.port,
            self.method,
            self.path,
            self.target_url,
            elapsed,
            outcome,
        ));
    }
}

/// Streams the upstream body to the client unchanged. The pending entry is
/// written at end of stream, on a body error, or when the client goes away,
/// whichever comes first.
pub(crate) struct LoggedBody {
    inner: BoxBody<Bytes, hyper::Error>,
    pending: Option<PendingEntry>,
}

impl LoggedBody {
    pub fn new(inner: BoxBody<Bytes, hyper::Error>, pending: PendingEntry) -> Self {
        Self {
            inner,
            pending: Some(pending),
        }
    }

    fn finish(&mut self, body_error: Option<String>) {
        if let Some(pending) = self.pending.take() {
            pending.finish(body_error);
        }
    }
}

impl Body for LoggedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(None) => {
                this.finish(None);
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(Some(format!("upstream response aborted: {e}")));
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for LoggedBody {
    fn drop(&mut self) {
        self.finish(None);
    }
}
