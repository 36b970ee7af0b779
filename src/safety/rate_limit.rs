use std::collections::VecDeque;
use std::time::{Duration, Instant};
use dashmap::DashMap;
use crate::errors::Rejection;

/// Sliding-window admission counter keyed by (target, class).
///
/// `check` never records; callers `record` only once every other admission
/// check has passed.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max: usize,
    hits: DashMap<(String, String), VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: usize) -> Self {
        Self { window, max, hits: DashMap::new() }
    }

    fn key(target: &str, class: &str) -> (String, String) {
        (target.trim().to_lowercase(), class.to_string())
    }

    pub fn check(&self, target: &str, class: &str) -> Result<(), Rejection> {
        self.check_at(target, class, Instant::now())
    }

    pub fn record(&self, target: &str, class: &str) {
        self.record_at(target, class, Instant::now());
    }

    fn check_at(&self, target: &str, class: &str, now: Instant) -> Result<(), Rejection> {
        let used = match self.hits.get_mut(&Self::key(target, class)) {
            Some(mut hits) => {
                prune(&mut hits, now, self.window);
                hits.len()
            }
            None => 0,
        };
        if used >= self.max {
            return Err(Rejection::RateLimited {
                target: target.trim().to_string(),
                limit: self.max,
                window_secs: self.window.as_secs(),
            });
        }
        Ok(())
    }

    fn record_at(&self, target: &str, class: &str, now: Instant) {
        let mut hits = self.hits.entry(Self::key(target, class)).or_default();
        prune(&mut hits, now, self.window);
        hits.push_back(now);
    }

    /// Drop keys whose window has fully elapsed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.hits.retain(|_, hits| {
            prune(hits, now, self.window);
            !hits.is_empty()
        });
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(first) = hits.front() {
        if now.duration_since(*first) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}
