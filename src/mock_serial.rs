//! Scripted serial-port double used by the client unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Emulates a serial session: reads drain a queue of scripted response
/// bytes, writes are captured for inspection, and an exhausted queue
/// behaves like a read timeout.
pub struct MockSerial {
    read_queue: VecDeque<u8>,
    written: Vec<u8>,
    timeout_on_read: bool,
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            read_queue: VecDeque::new(),
            written: Vec::new(),
            timeout_on_read: false,
        }
    }

    /// Appends response bytes to the read script.
    pub fn queue_read_data(&mut self, data: &[u8]) {
        self.read_queue.extend(data.iter().copied());
    }

    /// Makes every read fail with a timeout, as a serial port does when no
    /// byte arrives in time.
    pub fn set_read_timeout(&mut self, timeout: bool) {
        self.timeout_on_read = timeout;
    }

    /// Every byte written to the session so far.
    pub fn written_data(&self) -> &[u8] {
        &self.written
    }
}

impl Default for MockSerial {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.timeout_on_read {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "scripted timeout"));
        }
        if self.read_queue.is_empty() {
            // A drained script means the device went quiet.
            return Err(io::Error::new(io::ErrorKind::TimedOut, "script drained"));
        }
        let count = buf.len().min(self.read_queue.len());
        for slot in buf.iter_mut().take(count) {
            *slot = self.read_queue.pop_front().unwrap();
        }
        Ok(count)
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_drain_the_script_in_order() {
        let mut mock = MockSerial::new();
        mock.queue_read_data(&[0x01, 0x02]);
        mock.queue_read_data(&[0x03]);

        let mut buf = [0u8; 2];
        mock.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x01, 0x02]);
        let mut one = [0u8; 1];
        mock.read_exact(&mut one).unwrap();
        assert_eq!(one, [0x03]);
    }

    #[test]
    fn drained_script_times_out() {
        let mut mock = MockSerial::new();
        let mut buf = [0u8; 1];
        let err = mock.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn writes_are_captured() {
        let mut mock = MockSerial::new();
        mock.write_all(&[0xFE, 0x68]).unwrap();
        assert_eq!(mock.written_data(), &[0xFE, 0x68]);
    }
}
