//! Single-bit rendezvous device. Every node writes a status byte (0 =
//! busy, 1 = ready) to a shared file-backed device and polls a status
//! byte whose bit `0x20` means "all ready". Used only on the app channel;
//! `send_to_all`/`recv_from_master` are not meaningful here and panic if
//! called, matching the narrow scope the original core used this mode
//! for.

use clustersync_proto::logging::{self, Logger};
use clustersync_proto::NetworkResult;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::transport::Transport;

const READY: u8 = 1;
const BUSY: u8 = 0;
const ALL_READY_BIT: u8 = 0x20;
const POLL_INTERVAL: Duration = Duration::from_micros(500);

pub struct MagicDevice {
    device: File,
    log: Logger,
}

impl MagicDevice {
    pub fn open<P: AsRef<Path>>(path: P, log: &Logger) -> NetworkResult<MagicDevice> {
        let device = OpenOptions::new().read(true).write(true).open(path)?;
        logging::debug!(log, "magic device opened");
        Ok(MagicDevice {
            device,
            log: log.clone(),
        })
    }

    fn write_status(&mut self, status: u8) -> NetworkResult<()> {
        self.device.seek(SeekFrom::Start(0))?;
        self.device.write_all(&[status])?;
        Ok(())
    }

    fn read_status(&mut self) -> NetworkResult<u8> {
        self.device.seek(SeekFrom::Start(0))?;
        let mut byte = [0u8; 1];
        self.device.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn wait_for_all_ready(&mut self) -> NetworkResult<()> {
        loop {
            let status = self.read_status()?;
            if status & ALL_READY_BIT != 0 {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Transport for MagicDevice {
    fn send_to_all(&mut self, _bytes: &[u8]) -> NetworkResult<()> {
        panic!("magic device carries no payload, only barrier state");
    }

    fn recv_from_master(&mut self, _buf: &mut [u8]) -> NetworkResult<()> {
        panic!("magic device carries no payload, only barrier state");
    }

    fn send_to_master(&mut self, _bytes: &[u8]) -> NetworkResult<()> {
        panic!("magic device carries no payload, only barrier state");
    }

    fn recv_from_slave(&mut self, _index: usize, _buf: &mut [u8]) -> NetworkResult<()> {
        panic!("magic device carries no payload, only barrier state");
    }

    /// Every node writes ready, waits for the all-ready bit, then writes
    /// busy again. Slaves additionally exchange a one-byte ack with the
    /// master over the draw channel's stream connection in between,
    /// performed by the caller (the `Controller`, via
    /// `begin_barrier`/`finish_barrier`), since this device alone cannot
    /// address one peer or carry a payload.
    fn barrier(&mut self) -> NetworkResult<()> {
        self.begin_barrier()?;
        self.finish_barrier()
    }

    fn begin_barrier(&mut self) -> NetworkResult<()> {
        logging::trace!(self.log, "magic barrier: signalling ready");
        self.write_status(READY)?;
        self.wait_for_all_ready()
    }

    fn finish_barrier(&mut self) -> NetworkResult<()> {
        self.write_status(BUSY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write as _;

    fn make_device_file(initial: u8) -> tempfile_path::TempPath {
        tempfile_path::TempPath::with_byte(initial)
    }

    // Minimal scratch-file helper: avoids pulling in `tempfile` as a
    // dependency just for one test module.
    mod tempfile_path {
        use super::*;
        use std::env;

        pub struct TempPath(pub std::path::PathBuf);

        impl TempPath {
            pub fn with_byte(byte: u8) -> TempPath {
                let mut path = env::temp_dir();
                path.push(format!("clustersync-magic-test-{:?}", std::thread::current().id()));
                let mut file = fs::File::create(&path).unwrap();
                file.write_all(&[byte]).unwrap();
                TempPath(path)
            }
        }

        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = fs::remove_file(&self.0);
            }
        }
    }

    #[test]
    fn barrier_completes_once_all_ready_bit_is_set() {
        let path = make_device_file(ALL_READY_BIT);
        let log = logging::root_logger(false);
        let mut device = MagicDevice::open(&path.0, &log).unwrap();

        device.barrier().unwrap();

        let status = device.read_status().unwrap();
        assert_eq!(status, BUSY);
    }
}
