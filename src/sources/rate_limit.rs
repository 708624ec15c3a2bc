// Sliding-window throttle for the primary API.
//
// The primary API rate-limits per token over a rolling window. Calls wait
// here before going out so a crawl round never trips the upstream limit;
// a 429 that slips through still surfaces as FetchError::RateLimited and the
// caller's fallback chain moves on to the next backend.
//
// Shared across all concurrent tasks; interior mutability keeps the API at
// `&self`. The lock is never held across an await point.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::info;

struct Window {
    /// Timestamps of requests still inside the window.
    requests: VecDeque<Instant>,
    /// When the most recent request was let through.
    last_request: Option<Instant>,
}

pub struct RateLimiter {
    state: Mutex<Window>,
    max_requests: u32,
    window: Duration,
    /// Minimum spacing between consecutive requests.
    min_delay: Duration,
}

impl RateLimiter {
    /// - `max_requests_per_window`: how many requests are allowed in the window
    /// - `window`: the sliding window duration
    /// - `min_delay`: minimum spacing between consecutive requests
    pub fn new(max_requests_per_window: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            state: Mutex::new(Window {
                requests: VecDeque::new(),
                last_request: None,
            }),
            max_requests: max_requests_per_window.max(1),
            window,
            min_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        // A panic while holding the lock can't leave the window inconsistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until a request may go out, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let now = Instant::now();
                let mut state = self.lock();

                while let Some(&oldest) = state.requests.front() {
                    if now.duration_since(oldest) >= self.window {
                        state.requests.pop_front();
                    } else {
                        break;
                    }
                }

                let spacing = state
                    .last_request
                    .map(|last| self.min_delay.saturating_sub(now.duration_since(last)))
                    .unwrap_or(Duration::ZERO);

                if !spacing.is_zero() {
                    Some(spacing)
                } else if (state.requests.len() as u32) < self.max_requests {
                    state.requests.push_back(now);
                    state.last_request = Some(now);
                    None
                } else {
                    state
                        .requests
                        .front()
                        .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
                }
            };

            match wait {
                None => return,
                Some(wait) => {
                    if wait > self.min_delay {
                        info!(
                            delay_ms = wait.as_millis() as u64,
                            "Primary API window full, waiting {}ms",
                            wait.as_millis()
                        );
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Requests currently counted against the window.
    pub fn in_window(&self) -> usize {
        self.lock().requests.len()
    }
}
