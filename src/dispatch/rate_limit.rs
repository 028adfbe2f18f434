//! Fixed-window rate limiting for outgoing commands.
//!
//! Each sink gets a window that starts with its first command. Once the window
//! has elapsed the counter resets wholesale; it does not slide.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::error::{LinkError, Result};

/// Default commands allowed per window.
pub const DEFAULT_MAX_COMMANDS: u32 = 60;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// How many commands a sink may send per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    pub max_commands: u32,
    #[serde(rename = "window_ms", with = "crate::config::duration_ms")]
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_commands: DEFAULT_MAX_COMMANDS,
            window: DEFAULT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-sink command counters under one [`RateLimitPolicy`].
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    windows: HashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: HashMap::new(),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Count one command for `sink` at `now`.
    ///
    /// A rejected attempt is not counted.
    pub fn try_acquire(&mut self, sink: &str, now: Instant) -> Result<()> {
        let window = self.windows.entry(sink.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.saturating_duration_since(window.started) >= self.policy.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count >= self.policy.max_commands {
            tracing::warn!(
                "Rate limit hit for {}: {} commands in {:?}",
                sink,
                window.count,
                self.policy.window
            );
            return Err(LinkError::RateLimited {
                limit: self.policy.max_commands,
                window: self.policy.window,
            });
        }

        window.count += 1;
        Ok(())
    }

    /// Commands counted in the current window of `sink`.
    pub fn used(&self, sink: &str) -> u32 {
        self.windows.get(sink).map(|w| w.count).unwrap_or(0)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}
