//! Engine configuration: frame sizes plus the error-rate governor's
//! per-kind thresholds. Passed explicitly to [`crate::engine::Engine::init`]
//! rather than read from any global/hidden state (spec.md §9: "no hidden
//! singletons").

/// Parameters an [`crate::engine::Engine`] is built with.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub(crate) data_xfer_size: usize,
    pub(crate) ack_xfer_size: usize,
    pub(crate) bad_data_threshold_per_sec: u32,
    pub(crate) duplicated_threshold_per_sec: u32,
    pub(crate) parsing_failed_threshold_per_sec: u32,
    pub(crate) transport_fault_threshold_per_sec: u32,
}

impl EngineConfig {
    /// `data_xfer_size` is the fixed size of a data half-frame
    /// (`DATA_XFER_SIZE_BYTES`); must be large enough for package overhead
    /// plus at least one packet (`> 11` bytes). `ack_xfer_size` is usually 1.
    pub fn new(data_xfer_size: usize, ack_xfer_size: usize) -> Self {
        Self {
            data_xfer_size,
            ack_xfer_size,
            bad_data_threshold_per_sec: 50,
            duplicated_threshold_per_sec: 50,
            parsing_failed_threshold_per_sec: 20,
            transport_fault_threshold_per_sec: 10,
        }
    }

    /// Override the bad-data-received escalation threshold (events/sec).
    pub fn with_bad_data_threshold(mut self, threshold_per_sec: u32) -> Self {
        self.bad_data_threshold_per_sec = threshold_per_sec;
        self
    }

    /// Override the duplicated-package escalation threshold (events/sec).
    pub fn with_duplicated_threshold(mut self, threshold_per_sec: u32) -> Self {
        self.duplicated_threshold_per_sec = threshold_per_sec;
        self
    }

    /// Override the parse-failure escalation threshold (events/sec).
    pub fn with_parsing_failed_threshold(mut self, threshold_per_sec: u32) -> Self {
        self.parsing_failed_threshold_per_sec = threshold_per_sec;
        self
    }

    /// Override the transport-fault escalation threshold (events/sec).
    pub fn with_transport_fault_threshold(mut self, threshold_per_sec: u32) -> Self {
        self.transport_fault_threshold_per_sec = threshold_per_sec;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let cfg = EngineConfig::new(64, 1);
        assert_eq!(cfg.data_xfer_size, 64);
        assert_eq!(cfg.bad_data_threshold_per_sec, 50);
    }

    #[test]
    fn builders_override_one_field_at_a_time() {
        let cfg = EngineConfig::new(64, 1).with_parsing_failed_threshold(5);
        assert_eq!(cfg.parsing_failed_threshold_per_sec, 5);
        assert_eq!(cfg.bad_data_threshold_per_sec, 50);
    }
}
