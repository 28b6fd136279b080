use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use block_dev::{BLOCK_SIZE, BlockDevice, IoError};
use send_wrapper::SendWrapper;

/// 以宿主机上的镜像文件充当块设备
#[derive(Debug)]
pub struct BlockFile {
    inner: SendWrapper<RefCell<File>>,
}

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self {
            inner: SendWrapper::new(RefCell::new(fd)),
        }
    }
}

fn device_error(e: std::io::Error) -> IoError {
    log::error!("block file: {e}");
    IoError::Device
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), IoError> {
        self.read_blocks(block_id, &mut buf[..BLOCK_SIZE])
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), IoError> {
        self.write_blocks(block_id, &buf[..BLOCK_SIZE])
    }

    fn read_blocks(&self, start: usize, buf: &mut [u8]) -> Result<(), IoError> {
        if buf.len() % BLOCK_SIZE != 0 {
            return Err(IoError::Misaligned { len: buf.len() });
        }
        let mut file = self.inner.borrow_mut();
        file.seek(SeekFrom::Start((start * BLOCK_SIZE) as u64))
            .map_err(device_error)?;
        file.read_exact(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => IoError::OutOfRange {
                block_id: start + buf.len() / BLOCK_SIZE - 1,
            },
            _ => device_error(e),
        })
    }

    fn write_blocks(&self, start: usize, buf: &[u8]) -> Result<(), IoError> {
        if buf.len() % BLOCK_SIZE != 0 {
            return Err(IoError::Misaligned { len: buf.len() });
        }
        let mut file = self.inner.borrow_mut();
        file.seek(SeekFrom::Start((start * BLOCK_SIZE) as u64))
            .map_err(device_error)?;
        file.write_all(buf).map_err(device_error)
    }
}
