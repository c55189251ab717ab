// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Thin descriptor-level I/O shims.
//!
//! The Unix implementation goes through `libc` so that interrupted syscalls
//! can be restarted and per-call lengths capped; other platforms fall back
//! to portable `std::fs` equivalents with reduced capabilities.

#[cfg(unix)]
pub(crate) use unix::*;

#[cfg(not(unix))]
pub(crate) use portable::*;

/// Largest length handed to a single read or write syscall. Staying well
/// under `SSIZE_MAX` keeps device drivers and 32-bit kernels happy.
pub(crate) const MAX_IO_LEN: usize = 1 << 30;

#[cfg(unix)]
mod unix {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    use super::MAX_IO_LEN;

    fn offset_for(pos: u64) -> io::Result<libc::off_t> {
        libc::off_t::try_from(pos).map_err(|_| io::Error::from_raw_os_error(libc::EOVERFLOW))
    }

    pub(crate) fn read(file: &File, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(MAX_IO_LEN);
        loop {
            // SAFETY: the pointer and length describe the valid, exclusively
            // borrowed `buf` for the duration of the call.
            let ret = unsafe { libc::read(file.as_raw_fd(), buf.as_mut_ptr().cast(), len) };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }

    pub(crate) fn pread(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        let len = buf.len().min(MAX_IO_LEN);
        let offset = offset_for(pos)?;
        loop {
            // SAFETY: the pointer and length describe the valid, exclusively
            // borrowed `buf` for the duration of the call.
            let ret = unsafe { libc::pread(file.as_raw_fd(), buf.as_mut_ptr().cast(), len, offset) };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }

    pub(crate) fn write(file: &File, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len().min(MAX_IO_LEN);
        loop {
            // SAFETY: the pointer and length describe the valid borrowed
            // `buf` for the duration of the call.
            let ret = unsafe { libc::write(file.as_raw_fd(), buf.as_ptr().cast(), len) };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }

    pub(crate) fn pwrite(file: &File, buf: &[u8], pos: u64) -> io::Result<usize> {
        let len = buf.len().min(MAX_IO_LEN);
        let offset = offset_for(pos)?;
        loop {
            // SAFETY: the pointer and length describe the valid borrowed
            // `buf` for the duration of the call.
            let ret = unsafe { libc::pwrite(file.as_raw_fd(), buf.as_ptr().cast(), len, offset) };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }

    /// `lseek` relative to the start of the file.
    pub(crate) fn seek_set(file: &File, pos: u64) -> io::Result<u64> {
        let offset = offset_for(pos)?;
        // SAFETY: plain syscall on a valid descriptor.
        let ret = unsafe { libc::lseek(file.as_raw_fd(), offset, libc::SEEK_SET) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as u64)
    }

    /// The current file offset, probing seekability as a side effect.
    pub(crate) fn seek_current(file: &File) -> io::Result<u64> {
        // SAFETY: plain syscall on a valid descriptor.
        let ret = unsafe { libc::lseek(file.as_raw_fd(), 0, libc::SEEK_CUR) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as u64)
    }

    /// The offset of the end of the file, leaving the position there.
    pub(crate) fn seek_end(file: &File) -> io::Result<u64> {
        // SAFETY: plain syscall on a valid descriptor.
        let ret = unsafe { libc::lseek(file.as_raw_fd(), 0, libc::SEEK_END) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as u64)
    }

    pub(crate) fn truncate(file: &File, new_size: u64) -> io::Result<()> {
        file.set_len(new_size)
    }

    pub(crate) fn datasync(file: &File) -> io::Result<()> {
        file.sync_data()
    }

    /// Advises the kernel about sequential access, where supported.
    pub(crate) fn advise_sequential(file: &File, sequential: bool) {
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
        {
            let advice = if sequential {
                libc::POSIX_FADV_SEQUENTIAL
            } else {
                libc::POSIX_FADV_NORMAL
            };
            // SAFETY: plain advisory syscall on a valid descriptor; the
            // return value is deliberately ignored.
            unsafe {
                let _ = libc::posix_fadvise(file.as_raw_fd(), 0, 0, advice);
            }
        }
        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
        {
            let _ = (file, sequential);
        }
    }

    /// Kernel-to-kernel copy between descriptors. `None` offsets use and
    /// advance the descriptor's own position. Restarts on `EINTR`; any other
    /// error is the caller's cue to fall back to a userspace copy.
    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    pub(crate) fn copy_file_range(
        src: &File,
        src_pos: Option<u64>,
        dest: &File,
        dest_pos: Option<u64>,
        len: usize,
    ) -> io::Result<usize> {
        let len = len.min(MAX_IO_LEN);
        let mut off_in = src_pos.map(offset_for).transpose()?;
        let mut off_out = dest_pos.map(offset_for).transpose()?;
        loop {
            let off_in_ptr = off_in.as_mut().map_or(std::ptr::null_mut(), |off| off as *mut libc::off_t);
            let off_out_ptr = off_out.as_mut().map_or(std::ptr::null_mut(), |off| off as *mut libc::off_t);
            // SAFETY: offset pointers are either null or point at locals
            // that live across the call.
            let ret = unsafe {
                libc::copy_file_range(src.as_raw_fd(), off_in_ptr, dest.as_raw_fd(), off_out_ptr, len, 0)
            };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
    pub(crate) fn copy_file_range(
        _src: &File,
        _src_pos: Option<u64>,
        _dest: &File,
        _dest_pos: Option<u64>,
        _len: usize,
    ) -> io::Result<usize> {
        Err(io::Error::from_raw_os_error(libc::ENOSYS))
    }
}

#[cfg(not(unix))]
mod portable {
    use std::fs::File;
    use std::io::{self, Read, Seek, SeekFrom, Write};

    use super::MAX_IO_LEN;

    fn retry<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        loop {
            match op() {
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }

    pub(crate) fn read(mut file: &File, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(MAX_IO_LEN);
        retry(|| file.read(&mut buf[..len]))
    }

    pub(crate) fn pread(mut file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
        let len = buf.len().min(MAX_IO_LEN);
        retry(|| {
            file.seek(SeekFrom::Start(pos))?;
            file.read(&mut buf[..len])
        })
    }

    pub(crate) fn write(mut file: &File, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len().min(MAX_IO_LEN);
        retry(|| file.write(&buf[..len]))
    }

    pub(crate) fn pwrite(mut file: &File, buf: &[u8], pos: u64) -> io::Result<usize> {
        let len = buf.len().min(MAX_IO_LEN);
        retry(|| {
            file.seek(SeekFrom::Start(pos))?;
            file.write(&buf[..len])
        })
    }

    pub(crate) fn seek_set(mut file: &File, pos: u64) -> io::Result<u64> {
        file.seek(SeekFrom::Start(pos))
    }

    pub(crate) fn seek_current(mut file: &File) -> io::Result<u64> {
        file.stream_position()
    }

    pub(crate) fn seek_end(mut file: &File) -> io::Result<u64> {
        file.seek(SeekFrom::End(0))
    }

    pub(crate) fn truncate(file: &File, new_size: u64) -> io::Result<()> {
        file.set_len(new_size)
    }

    pub(crate) fn datasync(file: &File) -> io::Result<()> {
        file.sync_data()
    }

    pub(crate) fn advise_sequential(_file: &File, _sequential: bool) {}

    pub(crate) fn copy_file_range(
        _src: &File,
        _src_pos: Option<u64>,
        _dest: &File,
        _dest_pos: Option<u64>,
        _len: usize,
    ) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}
