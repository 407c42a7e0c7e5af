pub mod archive;
pub mod listing;

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use crate::ingest::types::FeedError;

/// Build an HTTP client with bounded connect/request timeouts.
pub(crate) fn http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, FeedError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .timeout(timeout)
        .build()
        .map_err(FeedError::from)
}

/// Map a non-success status to a feed error; 429 becomes a throttle signal.
pub(crate) fn status_error(status: StatusCode, headers: &HeaderMap) -> FeedError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return FeedError::Throttled { retry_after };
    }
    FeedError::Status {
        status: status.as_u16(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn too_many_requests_carries_retry_after() {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        match status_error(StatusCode::TOO_MANY_REQUESTS, &h) {
            FeedError::Throttled { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, &HeaderMap::new()),
            FeedError::Status { status: 502 }
        ));
    }
}
