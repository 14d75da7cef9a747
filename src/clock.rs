//! Time source
//!
//! Wall clock with a one-shot skew correction: the host process
//! measures the offset against a reference (NTP) once, after which
//! every timestamp derives from `system now + offset`.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};

/// Time capability consumed by the queue and identifier module
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock corrected by a lazily calibrated offset
#[derive(Debug, Default)]
pub struct SkewClock {
    offset_ms: OnceLock<i64>,
}

impl SkewClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the measured offset; only the first calibration sticks
    pub fn calibrate(&self, reference: DateTime<Utc>) {
        let offset = reference.signed_duration_since(Utc::now()).num_milliseconds();
        let _ = self.offset_ms.set(offset);
    }

    pub fn is_calibrated(&self) -> bool {
        self.offset_ms.get().is_some()
    }
}

impl Clock for SkewClock {
    fn now(&self) -> DateTime<Utc> {
        let offset = self.offset_ms.get().copied().unwrap_or(0);
        Utc::now() + Duration::milliseconds(offset)
    }
}

/// Frozen clock for deterministic tests
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
