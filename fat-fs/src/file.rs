//! 带读写位置的文件句柄

use vfs::Error;

use crate::inode::InodeHandle;

/// 打开的文件。
/// 析构即关闭底层inode；若本句柄禁用过写入，关闭前恰好恢复一次。
pub struct File {
    handle: InodeHandle,
    /// 当前读写位置
    pos: usize,
    /// 本句柄是否处于拒写配对中
    denied: bool,
}

impl File {
    pub(crate) fn new(handle: InodeHandle) -> Self {
        Self {
            handle,
            pos: 0,
            denied: false,
        }
    }

    /// 从当前位置读取并推进位置
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let read = self.handle.read_at(self.pos, buf);
        self.pos += read;
        read
    }

    /// 向当前位置写入并推进位置
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let wrote = self.handle.write_at(self.pos, buf);
        self.pos += wrote;
        wrote
    }

    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.handle.read_at(offset, buf)
    }

    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.handle.write_at(offset, buf)
    }

    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.handle.length()
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.handle.is_dir()
    }

    #[inline]
    pub fn handle(&self) -> &InodeHandle {
        &self.handle
    }

    /// 暂时禁止写入本文件（如执行期间）。
    /// 每个句柄至多生效一次，重复调用返回[`Error::WriteDenied`]。
    pub fn deny_write(&mut self) -> Result<(), Error> {
        if self.denied {
            return Err(Error::WriteDenied);
        }
        self.denied = true;
        self.handle.deny_write();
        Ok(())
    }

    /// 恢复写入，与[`File::deny_write`]配对
    pub fn allow_write(&mut self) -> Result<(), Error> {
        if !self.denied {
            return Err(Error::WriteDenied);
        }
        self.denied = false;
        self.handle.allow_write();
        Ok(())
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.denied {
            self.handle.allow_write();
        }
    }
}
