//! Per-flow context
//!
//! A [`Flow`] is one bidirectional transport conversation handed to the NAT
//! handler by the dispatcher: the upstream reader/writer pair, the intended
//! destination, and a cancellation token tied to the ambient request.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::FlowError;
use crate::outbound::{BoxedStream, Dialer};

/// Maximum dial attempts before a flow is failed
pub const MAX_DIAL_ATTEMPTS: u32 = 5;

/// Base delay of the exponential dial backoff
pub const DIAL_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Boxed upstream reader half
pub type FlowReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed upstream writer half
pub type FlowWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One bidirectional transport conversation
pub struct Flow {
    /// Destination the dispatcher routed this flow to
    pub destination: Option<Endpoint>,
    /// Upstream reader half (bytes from the client)
    pub reader: FlowReader,
    /// Upstream writer half (bytes back to the client)
    pub writer: FlowWriter,
    /// Cancellation of the ambient request
    pub cancel: CancellationToken,
}

impl Flow {
    /// Create a flow
    pub fn new(
        destination: Option<Endpoint>,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            destination,
            reader: Box::new(reader),
            writer: Box::new(writer),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("destination", &self.destination)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Dial a destination with exponential-backoff retry
///
/// Up to [`MAX_DIAL_ATTEMPTS`] attempts, sleeping `base * 2^(n-1)` between
/// them.
///
/// # Errors
///
/// Returns `FlowError::DialFailed` carrying the last dial error once all
/// attempts are exhausted.
pub(crate) async fn dial_with_retry(
    dialer: &dyn Dialer,
    dest: &Endpoint,
) -> Result<BoxedStream, FlowError> {
    let mut last_error = None;
    for attempt in 0..MAX_DIAL_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(DIAL_BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
        }
        match dialer.dial(dest).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                debug!(%dest, attempt = attempt + 1, error = %e, "Dial attempt failed");
                last_error = Some(e);
            }
        }
    }
    Err(FlowError::dial_failed(
        dest.clone(),
        MAX_DIAL_ATTEMPTS,
        last_error.map_or_else(String::new, |e| e.to_string()),
    ))
}
