use clustersync_proto::NetworkResult;

/// Common contract every back-end implements once, behind the `SyncMode`
/// chosen at `Controller` construction. Nothing above this trait branches
/// on the active mode again.
///
/// `send_to_all`/`recv_from_master` drive the master→slave direction,
/// `send_to_master`/`recv_from_slave` the reverse, and `barrier` performs
/// the mode-specific rendezvous described for each back-end.
///
/// Implementations that frame messages themselves (multicast, message
/// passing) set `self_framed()` to `true`, telling the `Controller` to
/// skip prefixing its own 16-byte header.
pub trait Transport: Send {
    /// Sends `bytes` to every slave. Master-side only.
    fn send_to_all(&mut self, bytes: &[u8]) -> NetworkResult<()>;

    /// Fills `buf` completely from the master. Slave-side only. A short
    /// read is retried until `buf` is full; `WouldBlock`/`Interrupted`
    /// are retried transparently.
    fn recv_from_master(&mut self, buf: &mut [u8]) -> NetworkResult<()>;

    /// Sends `bytes` to the master. Slave-side only.
    fn send_to_master(&mut self, bytes: &[u8]) -> NetworkResult<()>;

    /// Fills `buf` completely from slave `index`. Master-side only.
    fn recv_from_slave(&mut self, index: usize, buf: &mut [u8]) -> NetworkResult<()>;

    /// Rendezvous every node on the channel this transport instance backs.
    fn barrier(&mut self) -> NetworkResult<()>;

    /// First phase of a barrier: signal local readiness and wait for
    /// every other node to do likewise. Defaults to the full `barrier`,
    /// which is correct for every back-end except `Magic`, which needs
    /// the `Controller` to interleave a stream-based ack between this
    /// and `finish_barrier`.
    fn begin_barrier(&mut self) -> NetworkResult<()> {
        self.barrier()
    }

    /// Second phase of a barrier, run after anything the `Controller`
    /// needed to interleave. Most back-ends have nothing left to do.
    fn finish_barrier(&mut self) -> NetworkResult<()> {
        Ok(())
    }

    /// Whether this back-end applies its own message framing, so the
    /// `Controller` must not prefix a 16-byte header of its own.
    fn self_framed(&self) -> bool {
        false
    }
}
