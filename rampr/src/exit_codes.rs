use rampr_core::CapacityVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// A breaking point was found inside the tested range.
    CapacityDegraded = 10,

    /// No stage was healthy at a known concurrency.
    NoHealthyCapacity = 11,

    /// Invalid CLI/shape file/thresholds (bad flags, unreadable file, unknown preset, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, HTTP client setup, report persistence).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_verdict(verdict: &CapacityVerdict) -> Self {
        if verdict.is_urgent() {
            Self::NoHealthyCapacity
        } else if verdict.breaking_point.is_some() {
            Self::CapacityDegraded
        } else {
            Self::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_maps_to_exit_code() {
        let mut v = CapacityVerdict {
            max_healthy_capacity: Some(10),
            ..CapacityVerdict::default()
        };
        assert_eq!(ExitCode::from_verdict(&v), ExitCode::Success);

        v.breaking_point = Some("Stage 7 (30 users)".to_string());
        assert_eq!(ExitCode::from_verdict(&v), ExitCode::CapacityDegraded);

        v.max_healthy_capacity = None;
        assert_eq!(ExitCode::from_verdict(&v), ExitCode::NoHealthyCapacity);
    }
}
