use byteorder::{BigEndian, ByteOrder};

/// Wire size of an encoded `NodeSample`: one `f64` plus two `u64`s.
pub const NODE_SAMPLE_SIZE: usize = 24;

/// Per-frame counters a node reports to the master when `statistics` is
/// enabled in the configuration. Zeroed after every sample is taken.
#[derive(Debug, Copy, Clone, Default)]
pub struct NodeSample {
    pub frame_dt: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl NodeSample {
    /// The sample no real measurement can be smaller than on every
    /// field; used to seed a running minimum so the first real sample
    /// always wins, instead of racing against a zeroed default.
    fn worst_case_minimum() -> NodeSample {
        NodeSample {
            frame_dt: f64::INFINITY,
            bytes_sent: u64::MAX,
            bytes_received: u64::MAX,
        }
    }

    pub fn to_bytes(self) -> [u8; NODE_SAMPLE_SIZE] {
        let mut buf = [0u8; NODE_SAMPLE_SIZE];
        BigEndian::write_f64(&mut buf[0..8], self.frame_dt);
        BigEndian::write_u64(&mut buf[8..16], self.bytes_sent);
        BigEndian::write_u64(&mut buf[16..24], self.bytes_received);
        buf
    }

    pub fn from_bytes(buf: &[u8; NODE_SAMPLE_SIZE]) -> NodeSample {
        NodeSample {
            frame_dt: BigEndian::read_f64(&buf[0..8]),
            bytes_sent: BigEndian::read_u64(&buf[8..16]),
            bytes_received: BigEndian::read_u64(&buf[16..24]),
        }
    }
}

/// Running byte counters a node accumulates between stats samples.
#[derive(Debug, Default)]
pub struct SampleCounters {
    bytes_sent: u64,
    bytes_received: u64,
}

impl SampleCounters {
    pub fn new() -> SampleCounters {
        SampleCounters::default()
    }

    pub fn record_sent(&mut self, n: usize) {
        self.bytes_sent += n as u64;
    }

    pub fn record_received(&mut self, n: usize) {
        self.bytes_received += n as u64;
    }

    /// Packages the accumulated counters into a sample and zeroes them.
    pub fn take(&mut self, frame_dt: f64) -> NodeSample {
        let sample = NodeSample {
            frame_dt,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
        };
        self.bytes_sent = 0;
        self.bytes_received = 0;
        sample
    }
}

/// Master-side aggregation across every slave's reported sample: per-node
/// min/max and a cluster-wide max, used to normalize a display.
#[derive(Debug, Default)]
pub struct StatisticsSink {
    per_node_min: Vec<NodeSample>,
    per_node_max: Vec<NodeSample>,
    global_max: NodeSample,
}

impl StatisticsSink {
    pub fn new(num_slaves: usize) -> StatisticsSink {
        StatisticsSink {
            per_node_min: vec![NodeSample::worst_case_minimum(); num_slaves],
            per_node_max: vec![NodeSample::default(); num_slaves],
            global_max: NodeSample::default(),
        }
    }

    pub fn record(&mut self, index: usize, sample: NodeSample) {
        let min = &mut self.per_node_min[index];
        min.frame_dt = min.frame_dt.min(sample.frame_dt);
        min.bytes_sent = min.bytes_sent.min(sample.bytes_sent);
        min.bytes_received = min.bytes_received.min(sample.bytes_received);

        let max = &mut self.per_node_max[index];
        max.frame_dt = max.frame_dt.max(sample.frame_dt);
        max.bytes_sent = max.bytes_sent.max(sample.bytes_sent);
        max.bytes_received = max.bytes_received.max(sample.bytes_received);

        self.global_max.frame_dt = self.global_max.frame_dt.max(sample.frame_dt);
        self.global_max.bytes_sent = self.global_max.bytes_sent.max(sample.bytes_sent);
        self.global_max.bytes_received = self.global_max.bytes_received.max(sample.bytes_received);
    }

    pub fn min_for(&self, index: usize) -> NodeSample {
        self.per_node_min[index]
    }

    pub fn max_for(&self, index: usize) -> NodeSample {
        self.per_node_max[index]
    }

    pub fn global_max(&self) -> NodeSample {
        self.global_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_reset_after_take() {
        let mut counters = SampleCounters::new();
        counters.record_sent(100);
        counters.record_received(50);

        let sample = counters.take(0.016);
        assert_eq!(sample.bytes_sent, 100);
        assert_eq!(sample.bytes_received, 50);

        let next = counters.take(0.016);
        assert_eq!(next.bytes_sent, 0);
        assert_eq!(next.bytes_received, 0);
    }

    #[test]
    fn sink_tracks_global_max_across_nodes() {
        let mut sink = StatisticsSink::new(2);
        sink.record(0, NodeSample { frame_dt: 0.01, bytes_sent: 10, bytes_received: 5 });
        sink.record(1, NodeSample { frame_dt: 0.02, bytes_sent: 5, bytes_received: 20 });

        let global = sink.global_max();
        assert_eq!(global.frame_dt, 0.02);
        assert_eq!(global.bytes_sent, 10);
        assert_eq!(global.bytes_received, 20);
    }

    #[test]
    fn sink_tracks_real_per_node_minimum_not_zero() {
        let mut sink = StatisticsSink::new(1);
        sink.record(0, NodeSample { frame_dt: 0.02, bytes_sent: 200, bytes_received: 100 });
        sink.record(0, NodeSample { frame_dt: 0.01, bytes_sent: 50, bytes_received: 400 });

        let min = sink.min_for(0);
        assert_eq!(min.frame_dt, 0.01);
        assert_eq!(min.bytes_sent, 50);
        assert_eq!(min.bytes_received, 100);
    }

    #[test]
    fn node_sample_round_trips_through_bytes() {
        let sample = NodeSample { frame_dt: 0.0166, bytes_sent: 4096, bytes_received: 2048 };
        let decoded = NodeSample::from_bytes(&sample.to_bytes());

        assert_eq!(decoded.frame_dt, sample.frame_dt);
        assert_eq!(decoded.bytes_sent, sample.bytes_sent);
        assert_eq!(decoded.bytes_received, sample.bytes_received);
    }
}
