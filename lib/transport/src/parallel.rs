//! Parallel-port back-end (Linux only): master drives data output bits,
//! each slave drives one status-input bit. Master waits until every
//! slave's bit has joined (the bitwise AND of status and the
//! "all-children" mask equals that mask), then toggles its own data bit
//! to release. Unavailable on non-Linux targets, which is the trigger for
//! falling back to `SyncMode::Stream` at `Controller` construction.

use clustersync_proto::logging::{self, Logger};
use clustersync_proto::{ErrorType, NetworkError, NetworkResult};
use nix::libc;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::transport::Transport;

const PPCLAIM: libc::c_ulong = 0x708b;
const PPRSTATUS: libc::c_ulong = 0x8101_7341;
const PPWDATA: libc::c_ulong = 0x4001_7342;
const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Status bit driven by slave at `index` (0-based), matching the
/// original core's `1 << (i + 3)` layout.
fn slave_bit(index: usize) -> u8 {
    1 << (index + 3)
}

/// Bitwise OR of every slave's status bit: the mask the master compares
/// the port's status byte against to detect "all joined".
fn all_children_mask(num_slaves: usize) -> u8 {
    (0..num_slaves).fold(0u8, |mask, i| mask | slave_bit(i))
}

unsafe fn ioctl_no_arg(fd: i32, request: libc::c_ulong) -> NetworkResult<()> {
    if libc::ioctl(fd, request as _) < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

unsafe fn ioctl_read_u8(fd: i32, request: libc::c_ulong) -> NetworkResult<u8> {
    let mut value: u8 = 0;
    if libc::ioctl(fd, request as _, &mut value as *mut u8) < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(value)
}

unsafe fn ioctl_write_u8(fd: i32, request: libc::c_ulong, value: u8) -> NetworkResult<()> {
    if libc::ioctl(fd, request as _, &value as *const u8) < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

pub struct ParallelPort {
    device: File,
    my_bit: u8,
    all_children: u8,
    data_edge: bool,
    log: Logger,
}

impl ParallelPort {
    /// Opens and claims `/dev/parportN`. `index` is `None` for the
    /// master, `Some(slave_index)` for a slave.
    pub fn open<P: AsRef<Path>>(path: P, index: Option<usize>, num_slaves: usize, log: &Logger) -> NetworkResult<ParallelPort> {
        let device = OpenOptions::new().read(true).write(true).open(path)?;
        unsafe { ioctl_no_arg(device.as_raw_fd(), PPCLAIM)? };

        let my_bit = index.map(slave_bit).unwrap_or(0);

        logging::debug!(log, "parallel port claimed"; "index" => ?index);

        Ok(ParallelPort {
            device,
            my_bit,
            all_children: all_children_mask(num_slaves),
            data_edge: false,
            log: log.clone(),
        })
    }

    fn read_status(&self) -> NetworkResult<u8> {
        unsafe { ioctl_read_u8(self.device.as_raw_fd(), PPRSTATUS) }
    }

    fn write_data(&self, value: u8) -> NetworkResult<()> {
        unsafe { ioctl_write_u8(self.device.as_raw_fd(), PPWDATA, value) }
    }

    fn is_master(&self) -> bool {
        self.my_bit == 0
    }
}

impl Transport for ParallelPort {
    fn send_to_all(&mut self, _bytes: &[u8]) -> NetworkResult<()> {
        panic!("parallel port back-end carries no payload, only barrier state");
    }

    fn recv_from_master(&mut self, _buf: &mut [u8]) -> NetworkResult<()> {
        panic!("parallel port back-end carries no payload, only barrier state");
    }

    fn send_to_master(&mut self, _bytes: &[u8]) -> NetworkResult<()> {
        panic!("parallel port back-end carries no payload, only barrier state");
    }

    fn recv_from_slave(&mut self, _index: usize, _buf: &mut [u8]) -> NetworkResult<()> {
        panic!("parallel port back-end carries no payload, only barrier state");
    }

    fn barrier(&mut self) -> NetworkResult<()> {
        if self.is_master() {
            logging::trace!(self.log, "parallel barrier: waiting for all children");
            loop {
                let status = self.read_status()?;
                if status & self.all_children == self.all_children {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }

            self.data_edge = !self.data_edge;
            self.write_data(self.data_edge as u8)
        } else {
            self.data_edge = !self.data_edge;
            self.write_data(if self.data_edge { self.my_bit } else { 0 })?;

            let expected = self.data_edge as u8;
            loop {
                let status = self.read_status()?;
                if (status & 1) == expected {
                    return Ok(());
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

pub fn check_unavailable(path: &str) -> NetworkResult<()> {
    if !Path::new(path).exists() {
        return Err(NetworkError::Fatal(ErrorType::ModeUnavailable));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_children_mask_ors_each_slave_bit() {
        assert_eq!(all_children_mask(0), 0);
        assert_eq!(all_children_mask(1), 0b0000_1000);
        assert_eq!(all_children_mask(3), 0b0011_1000);
    }

    #[test]
    fn slave_bit_matches_original_layout() {
        assert_eq!(slave_bit(0), 1 << 3);
        assert_eq!(slave_bit(1), 1 << 4);
    }
}
