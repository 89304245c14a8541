//! Fixed offset between the feed server's clock and ours.
//!
//! `client = server + skew`. Captured once per session and never re-synced.

use chrono::DateTime;

use crate::logging::log_skew;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSkew {
    skew: f64,
}

impl ClockSkew {
    pub fn from_epochs(server_epoch: f64, client_epoch: f64) -> Self {
        let skew = Self {
            skew: client_epoch - server_epoch,
        };
        log_skew(server_epoch, client_epoch, skew.skew);
        skew
    }

    pub fn zero() -> Self {
        Self { skew: 0.0 }
    }

    pub fn secs(&self) -> f64 {
        self.skew
    }

    pub fn to_client(&self, server_time: f64) -> f64 {
        server_time + self.skew
    }

    pub fn to_server(&self, client_time: f64) -> f64 {
        client_time - self.skew
    }
}

/// Parse an HTTP `Date` header (RFC 2822 / IMF-fixdate) into epoch seconds.
pub fn parse_http_date(value: &str) -> Option<f64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.timestamp() as f64)
}
