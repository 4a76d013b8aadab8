use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::time::Duration;

use futures::StreamExt;
use tracing::warn;

/// Reads at most `max_bytes` of a response body, stopping the stream early once the cap is hit.
pub(crate) async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    let mut stream = resp.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    while let Some(next) = stream.next().await {
        match next {
            Ok(chunk) => {
                let room = max_bytes.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if buf.len() >= max_bytes {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read upstream error body");
                if buf.is_empty() {
                    return "<failed to read error body>".to_string();
                }
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// `initial * 2^retry` capped at `max`, plus up to a quarter of that again as jitter.
pub(crate) fn backoff_delay(initial: Duration, max: Duration, retry: u32) -> Duration {
    let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
    let capped = initial.checked_mul(factor).map_or(max, |d| d.min(max));
    capped + jitter(capped / 4)
}

/// Uniform-ish delay in `0..=ceiling`, at millisecond granularity.
fn jitter(ceiling: Duration) -> Duration {
    let ceiling_ms = ceiling.as_millis().max(1) as u64;
    let sample = RandomState::new().hash_one(ceiling_ms);
    Duration::from_millis(sample % (ceiling_ms + 1))
}

pub(crate) fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}
