//! Hand-maintained ABI surface of libfuse 3.x.
//!
//! Only the pieces the dispatch layer needs are mirrored here: the
//! `fuse_operations` callback table, `fuse_file_info`, the stable prefix of
//! `fuse_conn_info`, and the `fuse_main_real` entry point. Structs the host
//! owns and we never inspect stay opaque. An empty table slot is `None`,
//! which is ABI-identical to the C NULL function pointer the host treats as
//! "operation not implemented".

use std::ffi::{c_char, c_int, c_uint, c_void};

/// `fuse_fill_dir_t`: host-provided callback that appends one entry to a
/// readdir buffer. Returns 1 when the buffer is full.
pub type FillDir = Option<
    unsafe extern "C" fn(*mut c_void, *const c_char, *const libc::stat, libc::off_t, c_int) -> c_int,
>;

/// `struct fuse_bufvec`. Variable-length on the C side; opaque here. The
/// vectorized read/write operations hand it through untouched.
#[repr(C)]
pub struct BufVec {
    _private: [u8; 0],
}

/// `struct fuse_pollhandle`. Opaque notification handle for `poll`.
#[repr(C)]
pub struct PollHandle {
    _private: [u8; 0],
}

/// `struct fuse_config`. Layout has shifted between libfuse 3.x point
/// releases, so it is kept opaque rather than exposing a prefix that could
/// silently go stale.
#[repr(C)]
pub struct FuseConfig {
    _private: [u8; 0],
}

/// Stable prefix of `struct fuse_conn_info` (unchanged since libfuse 3.0).
#[repr(C)]
pub struct ConnInfo {
    pub proto_major: c_uint,
    pub proto_minor: c_uint,
    pub max_write: c_uint,
    pub max_read: c_uint,
    pub max_readahead: c_uint,
    pub capable: c_uint,
    pub want: c_uint,
    pub max_background: c_uint,
    pub congestion_threshold: c_uint,
    pub time_gran: c_uint,
    _reserved: [c_uint; 22],
}

// Bit positions of the fuse_file_info bitfield unit, LSB first as laid out
// by GCC/Clang on Linux.
const FFI_WRITEPAGE: u32 = 1 << 0;
const FFI_DIRECT_IO: u32 = 1 << 1;
const FFI_KEEP_CACHE: u32 = 1 << 2;
const FFI_FLUSH: u32 = 1 << 3;
const FFI_NONSEEKABLE: u32 = 1 << 4;
const FFI_FLOCK_RELEASE: u32 = 1 << 5;
const FFI_CACHE_READDIR: u32 = 1 << 6;
const FFI_NOFLUSH: u32 = 1 << 7;
const FFI_PARALLEL_DIRECT_WRITES: u32 = 1 << 8;

/// `struct fuse_file_info`: per-open-file context threaded through most
/// operations. `fh` is free for the handler to stash a file handle in; the
/// C bitfields are exposed through accessors.
#[repr(C)]
pub struct FileInfo {
    /// Open flags, as passed to `open(2)`.
    pub flags: c_int,
    bits: u32,
    _padding2: u32,
    /// Handler-owned file handle value.
    pub fh: u64,
    /// Lock owner id (flush, lock and flock-release calls).
    pub lock_owner: u64,
    /// Requested poll events (poll only).
    pub poll_events: u32,
}

impl FileInfo {
    fn bit(&self, mask: u32) -> bool {
        self.bits & mask != 0
    }

    fn set_bit(&mut self, mask: u32, on: bool) {
        if on {
            self.bits |= mask;
        } else {
            self.bits &= !mask;
        }
    }

    /// True when this write was initiated by the page cache.
    pub fn writepage(&self) -> bool {
        self.bit(FFI_WRITEPAGE)
    }

    /// True when the release was triggered by a `flock` release.
    pub fn flock_release(&self) -> bool {
        self.bit(FFI_FLOCK_RELEASE)
    }

    pub fn flush(&self) -> bool {
        self.bit(FFI_FLUSH)
    }

    /// Bypass the page cache for this open file (set from `open`/`create`).
    pub fn set_direct_io(&mut self, on: bool) {
        self.set_bit(FFI_DIRECT_IO, on);
    }

    /// Keep previously cached data when the file is opened.
    pub fn set_keep_cache(&mut self, on: bool) {
        self.set_bit(FFI_KEEP_CACHE, on);
    }

    pub fn set_nonseekable(&mut self, on: bool) {
        self.set_bit(FFI_NONSEEKABLE, on);
    }

    /// Allow the kernel to cache this directory's entries (set from
    /// `opendir`).
    pub fn set_cache_readdir(&mut self, on: bool) {
        self.set_bit(FFI_CACHE_READDIR, on);
    }

    /// Skip the implicit FLUSH when the last handle is closed.
    pub fn set_noflush(&mut self, on: bool) {
        self.set_bit(FFI_NOFLUSH, on);
    }

    pub fn set_parallel_direct_writes(&mut self, on: bool) {
        self.set_bit(FFI_PARALLEL_DIRECT_WRITES, on);
    }
}

/// `struct fuse_operations`, newest 3.x shape: 42 slots, `getattr` through
/// `lseek`. Field order is ABI and must not change.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct FuseOperations {
    pub getattr:
        Option<unsafe extern "C" fn(*const c_char, *mut libc::stat, *mut FileInfo) -> c_int>,
    pub readlink: Option<unsafe extern "C" fn(*const c_char, *mut c_char, usize) -> c_int>,
    pub mknod: Option<unsafe extern "C" fn(*const c_char, libc::mode_t, libc::dev_t) -> c_int>,
    pub mkdir: Option<unsafe extern "C" fn(*const c_char, libc::mode_t) -> c_int>,
    pub unlink: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub rmdir: Option<unsafe extern "C" fn(*const c_char) -> c_int>,
    pub symlink: Option<unsafe extern "C" fn(*const c_char, *const c_char) -> c_int>,
    pub rename: Option<unsafe extern "C" fn(*const c_char, *const c_char, c_uint) -> c_int>,
    pub link: Option<unsafe extern "C" fn(*const c_char, *const c_char) -> c_int>,
    pub chmod: Option<unsafe extern "C" fn(*const c_char, libc::mode_t, *mut FileInfo) -> c_int>,
    pub chown: Option<
        unsafe extern "C" fn(*const c_char, libc::uid_t, libc::gid_t, *mut FileInfo) -> c_int,
    >,
    pub truncate:
        Option<unsafe extern "C" fn(*const c_char, libc::off_t, *mut FileInfo) -> c_int>,
    pub open: Option<unsafe extern "C" fn(*const c_char, *mut FileInfo) -> c_int>,
    pub read: Option<
        unsafe extern "C" fn(*const c_char, *mut c_char, usize, libc::off_t, *mut FileInfo) -> c_int,
    >,
    pub write: Option<
        unsafe extern "C" fn(*const c_char, *const c_char, usize, libc::off_t, *mut FileInfo)
            -> c_int,
    >,
    pub statfs: Option<unsafe extern "C" fn(*const c_char, *mut libc::statvfs) -> c_int>,
    pub flush: Option<unsafe extern "C" fn(*const c_char, *mut FileInfo) -> c_int>,
    pub release: Option<unsafe extern "C" fn(*const c_char, *mut FileInfo) -> c_int>,
    pub fsync: Option<unsafe extern "C" fn(*const c_char, c_int, *mut FileInfo) -> c_int>,
    pub setxattr: Option<
        unsafe extern "C" fn(*const c_char, *const c_char, *const c_char, usize, c_int) -> c_int,
    >,
    pub getxattr:
        Option<unsafe extern "C" fn(*const c_char, *const c_char, *mut c_char, usize) -> c_int>,
    pub listxattr: Option<unsafe extern "C" fn(*const c_char, *mut c_char, usize) -> c_int>,
    pub removexattr: Option<unsafe extern "C" fn(*const c_char, *const c_char) -> c_int>,
    pub opendir: Option<unsafe extern "C" fn(*const c_char, *mut FileInfo) -> c_int>,
    pub readdir: Option<
        unsafe extern "C" fn(*const c_char, *mut c_void, FillDir, libc::off_t, *mut FileInfo, c_int)
            -> c_int,
    >,
    pub releasedir: Option<unsafe extern "C" fn(*const c_char, *mut FileInfo) -> c_int>,
    pub fsyncdir: Option<unsafe extern "C" fn(*const c_char, c_int, *mut FileInfo) -> c_int>,
    pub init: Option<unsafe extern "C" fn(*mut ConnInfo, *mut FuseConfig) -> *mut c_void>,
    pub destroy: Option<unsafe extern "C" fn(*mut c_void)>,
    pub access: Option<unsafe extern "C" fn(*const c_char, c_int) -> c_int>,
    pub create: Option<unsafe extern "C" fn(*const c_char, libc::mode_t, *mut FileInfo) -> c_int>,
    pub lock: Option<
        unsafe extern "C" fn(*const c_char, *mut FileInfo, c_int, *mut libc::flock) -> c_int,
    >,
    pub utimens:
        Option<unsafe extern "C" fn(*const c_char, *const libc::timespec, *mut FileInfo) -> c_int>,
    pub bmap: Option<unsafe extern "C" fn(*const c_char, usize, *mut u64) -> c_int>,
    pub ioctl: Option<
        unsafe extern "C" fn(*const c_char, c_uint, *mut c_void, *mut FileInfo, c_uint, *mut c_void)
            -> c_int,
    >,
    pub poll: Option<
        unsafe extern "C" fn(*const c_char, *mut FileInfo, *mut PollHandle, *mut c_uint) -> c_int,
    >,
    pub write_buf:
        Option<unsafe extern "C" fn(*const c_char, *mut BufVec, libc::off_t, *mut FileInfo) -> c_int>,
    pub read_buf: Option<
        unsafe extern "C" fn(*const c_char, *mut *mut BufVec, usize, libc::off_t, *mut FileInfo)
            -> c_int,
    >,
    pub flock: Option<unsafe extern "C" fn(*const c_char, *mut FileInfo, c_int) -> c_int>,
    pub fallocate: Option<
        unsafe extern "C" fn(*const c_char, c_int, libc::off_t, libc::off_t, *mut FileInfo) -> c_int,
    >,
    pub copy_file_range: Option<
        unsafe extern "C" fn(
            *const c_char,
            *mut FileInfo,
            libc::off_t,
            *const c_char,
            *mut FileInfo,
            libc::off_t,
            usize,
            c_int,
        ) -> isize,
    >,
    pub lseek: Option<
        unsafe extern "C" fn(*const c_char, libc::off_t, c_int, *mut FileInfo) -> libc::off_t,
    >,
}

unsafe extern "C" {
    /// The host runtime entry point: parses argv, mounts, runs the event
    /// loop until unmount or signal, and returns the process exit status.
    pub fn fuse_main_real(
        argc: c_int,
        argv: *mut *mut c_char,
        op: *const FuseOperations,
        op_size: usize,
        private_data: *mut c_void,
    ) -> c_int;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn operation_table_is_forty_two_pointer_slots() {
        assert_eq!(
            mem::size_of::<FuseOperations>(),
            42 * mem::size_of::<usize>()
        );
        // None must be representable as the C NULL pointer for the host to
        // recognize an empty slot.
        assert_eq!(
            mem::size_of::<Option<unsafe extern "C" fn(*const c_char) -> c_int>>(),
            mem::size_of::<usize>()
        );
    }

    #[cfg(all(target_os = "linux", target_pointer_width = "64"))]
    #[test]
    fn file_info_layout_matches_c() {
        assert_eq!(mem::size_of::<FileInfo>(), 40);
        assert_eq!(mem::offset_of!(FileInfo, fh), 16);
        assert_eq!(mem::offset_of!(FileInfo, lock_owner), 24);
        assert_eq!(mem::offset_of!(FileInfo, poll_events), 32);
    }

    #[test]
    fn file_info_bitfield_accessors() {
        let mut fi: FileInfo = unsafe { mem::zeroed() };
        assert!(!fi.writepage());
        fi.set_direct_io(true);
        fi.set_keep_cache(true);
        assert_eq!(fi.bits, FFI_DIRECT_IO | FFI_KEEP_CACHE);
        fi.set_direct_io(false);
        assert_eq!(fi.bits, FFI_KEEP_CACHE);
        assert!(!fi.flock_release());
        assert!(!fi.flush());
    }
}
