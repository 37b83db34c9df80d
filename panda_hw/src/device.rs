//! `DeviceHardware`: the kernel-driver-backed `HardwareAccess`
//! implementation. Opens `/dev/panda.map` and `mmap`s the register
//! region; opens one `/dev/panda.block` file descriptor per long-table
//! instance; opens `/dev/panda.stream` for the DMA capture reader.
//!
//! Register loads/stores are plain volatile 32-bit accesses into the
//! mapped region: these are lock-free on the target architecture, so
//! no mutex guards the map itself.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Mutex as StdMutex;

use crate::ioctl;
use crate::named::BIT_READ_RST_WORD;
use crate::named::BIT_READ_VALUE_WORD;
use crate::named::POS_READ_RST_WORD;
use crate::named::POS_READ_VALUE_WORD;
use crate::CompletionCode;
use crate::DmaStream;
use crate::HwError;
use crate::LongTableWriter;
use crate::RegAddr;
use crate::Result;
use crate::StreamEvent;

const MAP_PATH: &str = "/dev/panda.map";
const BLOCK_PATH: &str = "/dev/panda.block";
const STREAM_PATH: &str = "/dev/panda.stream";

pub struct DeviceHardware {
    map_fd: File,
    map_ptr: *mut u32,
    map_words: usize,
    /// `ioctl`s that mutate hardware go through one lock even though the
    /// map itself is lock-free, so register bursts (bit/position reads,
    /// table writes) observe a consistent snapshot.
    hw_lock: StdMutex<()>,
}

// SAFETY: `map_ptr` points at an mmap'd region for the lifetime of
// `map_fd`; all access goes through volatile reads/writes guarded where
// needed by `hw_lock`.
unsafe impl Send for DeviceHardware {}
unsafe impl Sync for DeviceHardware {}

impl DeviceHardware {
    pub fn open() -> Result<DeviceHardware> {
        let map_fd = File::options()
            .read(true)
            .write(true)
            .open(MAP_PATH)
            .map_err(HwError::Open)?;

        let mut size: u32 = 0;
        ioctl_call(map_fd.as_raw_fd(), ioctl::PANDA_MAP_SIZE, &mut size as *mut u32 as *mut libc::c_void, "PANDA_MAP_SIZE")?;

        let map_ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                map_fd.as_raw_fd(),
                0,
            )
        };
        if map_ptr == libc::MAP_FAILED {
            return Err(HwError::Open(io::Error::last_os_error()));
        }

        Ok(DeviceHardware {
            map_fd,
            map_ptr: map_ptr as *mut u32,
            map_words: size as usize / std::mem::size_of::<u32>(),
            hw_lock: StdMutex::new(()),
        })
    }

    fn word_ptr(&self, index: u32) -> *mut u32 {
        assert!((index as usize) < self.map_words, "register index {index} out of mapped range");
        unsafe { self.map_ptr.add(index as usize) }
    }

    fn load(&self, index: u32) -> u32 {
        unsafe { ptr::read_volatile(self.word_ptr(index)) }
    }

    fn store(&self, index: u32, value: u32) {
        unsafe { ptr::write_volatile(self.word_ptr(index), value) }
    }
}

impl Drop for DeviceHardware {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map_ptr as *mut libc::c_void, self.map_words * std::mem::size_of::<u32>());
        }
    }
}

impl crate::HardwareAccess for DeviceHardware {
    fn read_reg(&self, addr: RegAddr) -> Result<u32> {
        Ok(self.load(addr.word_index()))
    }

    fn write_reg(&self, addr: RegAddr, value: u32) -> Result<()> {
        self.store(addr.word_index(), value);
        Ok(())
    }

    fn read_bits(&self) -> Result<([bool; 128], [bool; 128])> {
        let _guard = self.hw_lock.lock().unwrap();
        self.store(BIT_READ_RST_WORD, 1);
        let mut values = [false; 128];
        let mut changes = [false; 128];
        for word in 0..8u32 {
            let packed = self.load(BIT_READ_VALUE_WORD + word);
            for bit in 0..16u32 {
                let i = (word * 16 + bit) as usize;
                values[i] = (packed >> (bit + 16)) & 1 != 0;
                changes[i] = (packed >> bit) & 1 != 0;
            }
        }
        Ok((values, changes))
    }

    fn read_positions(&self) -> Result<([u32; 32], [bool; 32])> {
        let _guard = self.hw_lock.lock().unwrap();
        self.store(POS_READ_RST_WORD, 1);
        let mut values = [0u32; 32];
        for (i, value) in values.iter_mut().enumerate() {
            *value = self.load(POS_READ_VALUE_WORD + i as u32);
        }
        let change_word = self.load(POS_READ_VALUE_WORD + 32);
        let mut changes = [false; 32];
        for (i, change) in changes.iter_mut().enumerate() {
            *change = (change_word >> i) & 1 != 0;
        }
        Ok((values, changes))
    }

    fn write_short_table(
        &self,
        reset_reg: RegAddr,
        fill_reg: RegAddr,
        length_reg: RegAddr,
        words: &[u32],
        max_len: usize,
    ) -> Result<()> {
        if words.len() > max_len {
            return Err(HwError::TableTooLong { len: words.len(), max: max_len });
        }
        let _guard = self.hw_lock.lock().unwrap();
        self.store(reset_reg.word_index(), 1);
        for &word in words {
            self.store(fill_reg.word_index(), word);
        }
        self.store(length_reg.word_index(), words.len() as u32);
        Ok(())
    }

    fn open_long_table(&self, order: u32, base_reg: RegAddr, length_reg: RegAddr) -> Result<Box<dyn LongTableWriter>> {
        let instance = base_reg.instance;
        let path = CString::new(BLOCK_PATH).unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
        if fd < 0 {
            return Err(HwError::Open(io::Error::last_os_error()));
        }

        let config = ioctl::BlockConfig {
            block_base: base_reg.word_index(),
            block_length: 0,
            order,
            nbuffers: 1,
            dma_channel: instance as u32,
        };
        let result = ioctl_call(fd, ioctl::PANDA_BLOCK_CONFIG, &config as *const _ as *mut libc::c_void, "PANDA_BLOCK_CONFIG");
        if let Err(e) = result {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        Ok(Box::new(DeviceLongTable { fd, length_reg }))
    }

    fn arm(&self) -> Result<()> {
        let stream = self.open_device(STREAM_PATH)?;
        ioctl_call(stream.as_raw_fd(), ioctl::PANDA_DMA_ARM, ptr::null_mut(), "PANDA_DMA_ARM")
    }

    fn disarm(&self) -> Result<()> {
        // Disarm is a register write on the PCAP block; callers issue it
        // through `write_reg` against the named `PCAP_ARM`/`PCAP_DISARM`
        // register, so this is a no-op at the device-file layer.
        Ok(())
    }

    fn open_stream(&self) -> Result<Box<dyn DmaStream>> {
        let file = self.open_device(STREAM_PATH)?;
        ioctl_call(file.as_raw_fd(), ioctl::PANDA_DMA_ARM, ptr::null_mut(), "PANDA_DMA_ARM")?;
        Ok(Box::new(DeviceStream { file }))
    }

    fn write_mac(&self, index: usize, octets: [u8; 6]) -> Result<()> {
        const MAC_BASE_WORD: u32 = 4096;
        let lo = u32::from_be_bytes([0, octets[2], octets[1], octets[0]]);
        let hi = u32::from_be_bytes([0, 0, octets[5], octets[4]]) | ((octets[3] as u32) << 16);
        self.store(MAC_BASE_WORD + (index as u32) * 2, lo);
        self.store(MAC_BASE_WORD + (index as u32) * 2 + 1, hi);
        Ok(())
    }
}

impl DeviceHardware {
    fn open_device(&self, path: &str) -> Result<File> {
        File::options().read(true).write(true).open(path).map_err(HwError::Open)
    }
}

struct DeviceLongTable {
    fd: RawFd,
    /// Word count is tracked by the driver itself (`PANDA_BLOCK_NWORDS`);
    /// kept here only so the `length_reg` binding stays visible at the
    /// call site for anyone reading the commit path.
    length_reg: RegAddr,
}

impl Drop for DeviceLongTable {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

impl LongTableWriter for DeviceLongTable {
    fn write_fragment(&mut self, words: &[u32], more: bool) -> Result<()> {
        let _ = self.length_reg;
        let send = ioctl::BlockSend {
            ptr: words.as_ptr(),
            length: words.len() as u32,
            more: more as u32,
        };
        ioctl_call(self.fd, ioctl::PANDA_BLOCK_SEND, &send as *const _ as *mut libc::c_void, "PANDA_BLOCK_SEND")
    }
}

struct DeviceStream {
    file: File,
}

impl DmaStream for DeviceStream {
    fn read_block(&mut self, buf: &mut [u8]) -> Result<StreamEvent> {
        use std::io::Read;
        match self.file.read(buf) {
            Ok(0) => Ok(StreamEvent::EndOfCapture),
            Ok(n) => Ok(StreamEvent::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(StreamEvent::Timeout),
            Err(e) => Err(HwError::Open(e)),
        }
    }

    fn completion(&mut self) -> Result<CompletionCode> {
        let mut code: u32 = 0;
        ioctl_call(self.file.as_raw_fd(), ioctl::PANDA_COMPLETION, &mut code as *mut u32 as *mut libc::c_void, "PANDA_COMPLETION")
            .map_err(|e| match e {
                HwError::Ioctl(_, err) => HwError::CompletionFailed(err),
                other => other,
            })?;
        Ok(CompletionCode::from_raw(code))
    }

    fn start_timestamp_ns(&mut self) -> Result<i64> {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        ioctl_call(
            self.file.as_raw_fd(),
            ioctl::PANDA_GET_START_TS,
            &mut ts as *mut libc::timespec as *mut libc::c_void,
            "PANDA_GET_START_TS",
        )?;
        Ok(ts.tv_sec * 1_000_000_000 + ts.tv_nsec)
    }
}

fn ioctl_call(fd: RawFd, request: libc::c_ulong, arg: *mut libc::c_void, name: &'static str) -> Result<()> {
    let rc = unsafe { libc::ioctl(fd, request as _, arg) };
    if rc < 0 {
        return Err(HwError::Ioctl(name, io::Error::last_os_error()));
    }
    Ok(())
}
