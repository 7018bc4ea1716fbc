use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing summary of the most recently completed stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub response_time_ms: u64,
    pub tokens_generated: u64,
    pub tokens_per_second: f64,
}

impl StreamStats {
    /// Shared by the streaming and the drained path. Throughput is rounded to
    /// two decimals and is 0 when no measurable time has elapsed.
    pub fn compute(tokens_generated: u64, elapsed: Duration) -> Self {
        let response_time_ms = elapsed.as_millis() as u64;
        let tokens_per_second = if response_time_ms == 0 {
            0.0
        } else {
            let raw = tokens_generated as f64 / (response_time_ms as f64 / 1000.0);
            (raw * 100.0).round() / 100.0
        };

        Self {
            response_time_ms,
            tokens_generated,
            tokens_per_second: if tokens_per_second.is_finite() {
                tokens_per_second
            } else {
                0.0
            },
        }
    }
}
