//! Capture buffer: a fixed-size ring of `N` blocks of
//! `B` bytes. One writer thread (the DMA reader) appends whole blocks;
//! any number of readers (one per connected data client) track an
//! absolute block-index cursor and wake when new blocks land. A reader
//! that the writer laps is declared overrun and must be dropped by its
//! owning connection.

use std::sync::Condvar;
use std::time::Duration;
use std::time::Instant;

use base::Mutex;

/// FPGA DMA blocks this size by default.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;
pub const DEFAULT_BLOCK_COUNT: usize = 64;

struct Inner {
    blocks: Vec<Vec<u8>>,
    /// Absolute index of the next block the writer will fill.
    write_cursor: u64,
}

pub struct CaptureBuffer {
    block_size: usize,
    count: usize,
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl CaptureBuffer {
    pub fn new(block_size: usize, count: usize) -> CaptureBuffer {
        CaptureBuffer {
            block_size,
            count,
            inner: Mutex::new(Inner { blocks: vec![Vec::new(); count], write_cursor: 0 }),
            condvar: Condvar::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Appends one block (truncated/padded to `block_size` is the
    /// caller's responsibility; the DMA reader always hands whole
    /// hardware blocks) and wakes any waiting readers.
    pub fn push(&self, data: Vec<u8>) {
        let mut inner = self.inner.lock();
        let slot = (inner.write_cursor % self.count as u64) as usize;
        inner.blocks[slot] = data;
        inner.write_cursor += 1;
        self.condvar.notify_all();
    }

    pub fn write_cursor(&self) -> u64 {
        self.inner.lock().write_cursor
    }

    /// Blocks until block `cursor` is available, then returns a clone of
    /// it plus the advanced cursor. Returns `Err(cursor)` if the writer
    /// has already lapped this reader (overrun): the stale cursor value
    /// identifies how far behind the reader fell.
    pub fn read_at(&self, cursor: u64) -> Result<(Vec<u8>, u64), u64> {
        let mut inner = self.inner.lock();
        while inner.write_cursor <= cursor {
            if self.is_overrun(&inner, cursor) {
                return Err(cursor);
            }
            inner = self.condvar.wait(inner).unwrap();
        }
        if self.is_overrun(&inner, cursor) {
            return Err(cursor);
        }
        let slot = (cursor % self.count as u64) as usize;
        Ok((inner.blocks[slot].clone(), cursor + 1))
    }

    /// Like [`Self::read_at`] but gives up after `timeout` with `Ok(None)`
    /// instead of blocking forever, so a data-client reader can still
    /// notice the capture session ended with no further blocks coming.
    pub fn read_at_timeout(&self, cursor: u64, timeout: Duration) -> Result<Option<(Vec<u8>, u64)>, u64> {
        let mut inner = self.inner.lock();
        let deadline = Instant::now() + timeout;
        while inner.write_cursor <= cursor {
            if self.is_overrun(&inner, cursor) {
                return Err(cursor);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let (guard, result) = self.condvar.wait_timeout(inner, remaining).unwrap();
            inner = guard;
            if result.timed_out() && inner.write_cursor <= cursor {
                return Ok(None);
            }
        }
        if self.is_overrun(&inner, cursor) {
            return Err(cursor);
        }
        let slot = (cursor % self.count as u64) as usize;
        Ok(Some((inner.blocks[slot].clone(), cursor + 1)))
    }

    fn is_overrun(&self, inner: &Inner, cursor: u64) -> bool {
        inner.write_cursor > cursor + self.count as u64
    }

    pub fn new_cursor(&self) -> u64 {
        self.inner.lock().write_cursor
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        CaptureBuffer::new(DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reader_sees_blocks_in_order() {
        let buf = CaptureBuffer::new(4, 4);
        buf.push(vec![1, 2, 3, 4]);
        buf.push(vec![5, 6, 7, 8]);
        let (block, cursor) = buf.read_at(0).unwrap();
        assert_eq!(block, vec![1, 2, 3, 4]);
        let (block, _) = buf.read_at(cursor).unwrap();
        assert_eq!(block, vec![5, 6, 7, 8]);
    }

    #[test]
    fn lapped_reader_reports_overrun() {
        let buf = CaptureBuffer::new(4, 2);
        for i in 0..5u8 {
            buf.push(vec![i; 4]);
        }
        assert_eq!(buf.read_at(0), Err(0));
    }

    #[test]
    fn reader_wakes_when_block_arrives() {
        let buf = Arc::new(CaptureBuffer::new(4, 4));
        let reader = buf.clone();
        let handle = thread::spawn(move || reader.read_at(0));
        thread::sleep(Duration::from_millis(20));
        buf.push(vec![9, 9, 9, 9]);
        let (block, _) = handle.join().unwrap().unwrap();
        assert_eq!(block, vec![9, 9, 9, 9]);
    }
}
