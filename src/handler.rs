//! The handler-facing surface: the [`Filesystem`] trait one implements to
//! get a mountable filesystem, the [`OpSet`] capability declaration, and the
//! readdir [`DirFiller`] wrapper.

use std::ffi::{CString, OsStr, c_int, c_uint, c_void};
use std::marker::PhantomData;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use bitflags::bitflags;

use crate::sys::{BufVec, ConnInfo, FileInfo, FillDir, FuseConfig, PollHandle};

bitflags! {
    /// The set of operations a handler type implements beyond the default
    /// "unsupported" stubs. One flag per callback-table slot; a slot is
    /// populated if and only if its flag is declared in
    /// [`Filesystem::CAPABILITIES`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpSet: u64 {
        const GETATTR = 1 << 0;
        const READLINK = 1 << 1;
        const MKNOD = 1 << 2;
        const MKDIR = 1 << 3;
        const UNLINK = 1 << 4;
        const RMDIR = 1 << 5;
        const SYMLINK = 1 << 6;
        const RENAME = 1 << 7;
        const LINK = 1 << 8;
        const CHMOD = 1 << 9;
        const CHOWN = 1 << 10;
        const TRUNCATE = 1 << 11;
        const OPEN = 1 << 12;
        const READ = 1 << 13;
        const WRITE = 1 << 14;
        const STATFS = 1 << 15;
        const FLUSH = 1 << 16;
        const RELEASE = 1 << 17;
        const FSYNC = 1 << 18;
        const SETXATTR = 1 << 19;
        const GETXATTR = 1 << 20;
        const LISTXATTR = 1 << 21;
        const REMOVEXATTR = 1 << 22;
        const OPENDIR = 1 << 23;
        const READDIR = 1 << 24;
        const RELEASEDIR = 1 << 25;
        const FSYNCDIR = 1 << 26;
        const INIT = 1 << 27;
        const DESTROY = 1 << 28;
        const ACCESS = 1 << 29;
        const CREATE = 1 << 30;
        const LOCK = 1 << 31;
        const UTIMENS = 1 << 32;
        const BMAP = 1 << 33;
        const IOCTL = 1 << 34;
        const POLL = 1 << 35;
        const WRITE_BUF = 1 << 36;
        const READ_BUF = 1 << 37;
        const FLOCK = 1 << 38;
        const FALLOCATE = 1 << 39;
        const COPY_FILE_RANGE = 1 << 40;
        const LSEEK = 1 << 41;
    }
}

bitflags! {
    /// Flags of the `rename` operation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RenameFlags: c_uint {
        /// Fail instead of replacing an existing target.
        const NOREPLACE = libc::RENAME_NOREPLACE;
        /// Atomically exchange source and target.
        const EXCHANGE = libc::RENAME_EXCHANGE;
        const WHITEOUT = libc::RENAME_WHITEOUT;
    }
}

bitflags! {
    /// Flags passed to the `readdir` operation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ReadDirFlags: u32 {
        /// Readdirplus mode: the host wants full attributes per entry.
        const PLUS = 1 << 0;
    }
}

bitflags! {
    /// Flags accepted by [`DirFiller::add`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FillDirFlags: u32 {
        /// The entry carries a complete `stat`, usable for readdirplus.
        const PLUS = 1 << 1;
    }
}

/// Wraps the host's readdir buffer and fill callback into one appender.
pub struct DirFiller<'a> {
    buf: *mut c_void,
    fill: FillDir,
    _host: PhantomData<&'a mut c_void>,
}

impl DirFiller<'_> {
    pub(crate) fn new(buf: *mut c_void, fill: FillDir) -> Self {
        Self {
            buf,
            fill,
            _host: PhantomData,
        }
    }

    /// Appends one directory entry. `offset` is the next readdir offset, or
    /// 0 when the handler fills the whole directory in one pass. Returns
    /// `false` once the host buffer is full and the listing should stop.
    ///
    /// Entry names cannot carry interior NUL bytes across the C boundary;
    /// such an entry is logged and skipped, and listing continues.
    pub fn add(
        &mut self,
        name: &OsStr,
        stat: Option<&libc::stat>,
        offset: libc::off_t,
        flags: FillDirFlags,
    ) -> bool {
        let Some(fill) = self.fill else {
            return false;
        };
        let Ok(name) = CString::new(name.as_bytes()) else {
            warn!("skipping directory entry with interior NUL byte");
            return true;
        };
        let stat = stat.map_or(ptr::null(), |s| s as *const libc::stat);
        unsafe { fill(self.buf, name.as_ptr(), stat, offset, flags.bits() as c_int) == 0 }
    }
}

/// A path-addressed filesystem, one method per host operation.
///
/// Every method defaults to the "unsupported" stub (`-ENOSYS`), but the stub
/// is never what the host sees: only the operations named in
/// [`CAPABILITIES`](Self::CAPABILITIES) are installed in the callback table
/// at all, and the rest stay at the host's NULL sentinel so it can apply its
/// own fallback policy.
///
/// Methods follow the host calling convention: arguments arrive in host
/// order (C data reinterpreted, not copied), and the returned integer is
/// passed back verbatim: `0` or a byte count on success, a negative errno
/// (`-libc::ENOENT`, ...) on failure. The host invokes operations from
/// multiple threads concurrently, hence the `Send + Sync` bound; mutable
/// filesystem state needs interior synchronization.
#[allow(unused_variables)]
pub trait Filesystem: Send + Sync + 'static {
    /// The operations this type implements. Declaring a flag without
    /// overriding the method leaves the default stub reachable, which
    /// reports `-ENOSYS` per call instead of letting the host short-circuit.
    const CAPABILITIES: OpSet;

    fn getattr(&self, path: &Path, stat: &mut libc::stat, fi: Option<&mut FileInfo>) -> c_int {
        -libc::ENOSYS
    }

    fn readlink(&self, path: &Path, buf: &mut [u8]) -> c_int {
        -libc::ENOSYS
    }

    fn mknod(&self, path: &Path, mode: libc::mode_t, dev: libc::dev_t) -> c_int {
        -libc::ENOSYS
    }

    fn mkdir(&self, path: &Path, mode: libc::mode_t) -> c_int {
        -libc::ENOSYS
    }

    fn unlink(&self, path: &Path) -> c_int {
        -libc::ENOSYS
    }

    fn rmdir(&self, path: &Path) -> c_int {
        -libc::ENOSYS
    }

    /// Create a symlink at `link` pointing to `target`.
    fn symlink(&self, target: &Path, link: &Path) -> c_int {
        -libc::ENOSYS
    }

    fn rename(&self, from: &Path, to: &Path, flags: RenameFlags) -> c_int {
        -libc::ENOSYS
    }

    fn link(&self, from: &Path, to: &Path) -> c_int {
        -libc::ENOSYS
    }

    fn chmod(&self, path: &Path, mode: libc::mode_t, fi: Option<&mut FileInfo>) -> c_int {
        -libc::ENOSYS
    }

    fn chown(
        &self,
        path: &Path,
        uid: libc::uid_t,
        gid: libc::gid_t,
        fi: Option<&mut FileInfo>,
    ) -> c_int {
        -libc::ENOSYS
    }

    fn truncate(&self, path: &Path, size: libc::off_t, fi: Option<&mut FileInfo>) -> c_int {
        -libc::ENOSYS
    }

    fn open(&self, path: &Path, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns the number of bytes
    /// read, or a negative errno.
    fn read(&self, path: &Path, buf: &mut [u8], offset: libc::off_t, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    /// Write `buf` at `offset`. Returns the number of bytes written, or a
    /// negative errno.
    fn write(&self, path: &Path, buf: &[u8], offset: libc::off_t, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    fn statfs(&self, path: &Path, stat: &mut libc::statvfs) -> c_int {
        -libc::ENOSYS
    }

    fn flush(&self, path: &Path, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    fn release(&self, path: &Path, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    fn fsync(&self, path: &Path, datasync: c_int, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    fn setxattr(&self, path: &Path, name: &OsStr, value: &[u8], flags: c_int) -> c_int {
        -libc::ENOSYS
    }

    /// With an empty `buf`, return the value size; otherwise copy the value
    /// into `buf` and return the number of bytes copied.
    fn getxattr(&self, path: &Path, name: &OsStr, buf: &mut [u8]) -> c_int {
        -libc::ENOSYS
    }

    fn listxattr(&self, path: &Path, buf: &mut [u8]) -> c_int {
        -libc::ENOSYS
    }

    fn removexattr(&self, path: &Path, name: &OsStr) -> c_int {
        -libc::ENOSYS
    }

    fn opendir(&self, path: &Path, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    fn readdir(
        &self,
        path: &Path,
        filler: &mut DirFiller<'_>,
        offset: libc::off_t,
        fi: &mut FileInfo,
        flags: ReadDirFlags,
    ) -> c_int {
        -libc::ENOSYS
    }

    fn releasedir(&self, path: &Path, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    fn fsyncdir(&self, path: &Path, datasync: c_int, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    /// Called once after the host finishes mount negotiation.
    fn init(&self, conn: &mut ConnInfo, config: &mut FuseConfig) {}

    /// Called once on unmount, before the host loop exits.
    fn destroy(&self) {}

    fn access(&self, path: &Path, mask: c_int) -> c_int {
        -libc::ENOSYS
    }

    fn create(&self, path: &Path, mode: libc::mode_t, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    /// POSIX record locking (`F_GETLK`/`F_SETLK`/`F_SETLKW` as `cmd`).
    fn lock(&self, path: &Path, fi: &mut FileInfo, cmd: c_int, lock: &mut libc::flock) -> c_int {
        -libc::ENOSYS
    }

    /// Update access and modification times (`times[0]` is atime).
    fn utimens(
        &self,
        path: &Path,
        times: &[libc::timespec; 2],
        fi: Option<&mut FileInfo>,
    ) -> c_int {
        -libc::ENOSYS
    }

    fn bmap(&self, path: &Path, blocksize: usize, idx: &mut u64) -> c_int {
        -libc::ENOSYS
    }

    /// `arg` and `data` are host-owned raw pointers whose meaning depends on
    /// `cmd`; dereferencing them is the handler's responsibility.
    fn ioctl(
        &self,
        path: &Path,
        cmd: c_uint,
        arg: *mut c_void,
        fi: &mut FileInfo,
        flags: c_uint,
        data: *mut c_void,
    ) -> c_int {
        -libc::ENOSYS
    }

    fn poll(
        &self,
        path: &Path,
        fi: &mut FileInfo,
        handle: *mut PollHandle,
        revents: &mut c_uint,
    ) -> c_int {
        -libc::ENOSYS
    }

    /// Vectorized write; `buf` is the host-owned `fuse_bufvec`.
    fn write_buf(&self, path: &Path, buf: *mut BufVec, offset: libc::off_t, fi: &mut FileInfo) -> c_int {
        -libc::ENOSYS
    }

    /// Vectorized read; the handler stores a `fuse_bufvec` it allocated with
    /// the host allocator into `*bufp`.
    fn read_buf(
        &self,
        path: &Path,
        bufp: *mut *mut BufVec,
        size: usize,
        offset: libc::off_t,
        fi: &mut FileInfo,
    ) -> c_int {
        -libc::ENOSYS
    }

    /// BSD advisory locking (`LOCK_SH`/`LOCK_EX`/`LOCK_UN` in `op`).
    fn flock(&self, path: &Path, fi: &mut FileInfo, op: c_int) -> c_int {
        -libc::ENOSYS
    }

    fn fallocate(
        &self,
        path: &Path,
        mode: c_int,
        offset: libc::off_t,
        length: libc::off_t,
        fi: &mut FileInfo,
    ) -> c_int {
        -libc::ENOSYS
    }

    /// Copy `size` bytes between two open files without a userspace round
    /// trip. Returns the number of bytes copied, or a negative errno.
    fn copy_file_range(
        &self,
        path_in: &Path,
        fi_in: &mut FileInfo,
        offset_in: libc::off_t,
        path_out: &Path,
        fi_out: &mut FileInfo,
        offset_out: libc::off_t,
        size: usize,
        flags: c_int,
    ) -> isize {
        -libc::ENOSYS as isize
    }

    fn lseek(&self, path: &Path, offset: libc::off_t, whence: c_int, fi: &mut FileInfo) -> libc::off_t {
        (-libc::ENOSYS) as libc::off_t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_char;
    use std::mem;

    struct Inert;

    impl Filesystem for Inert {
        const CAPABILITIES: OpSet = OpSet::empty();
    }

    #[test]
    fn default_stubs_report_enosys() {
        let fs = Inert;
        let mut stat: libc::stat = unsafe { mem::zeroed() };
        assert_eq!(fs.getattr(Path::new("/x"), &mut stat, None), -libc::ENOSYS);
        assert_eq!(fs.unlink(Path::new("/x")), -libc::ENOSYS);
        assert_eq!(
            fs.rename(Path::new("/a"), Path::new("/b"), RenameFlags::empty()),
            -libc::ENOSYS
        );
        let mut fi: FileInfo = unsafe { mem::zeroed() };
        assert_eq!(
            fs.lseek(Path::new("/x"), 0, libc::SEEK_SET, &mut fi),
            (-libc::ENOSYS) as libc::off_t
        );
    }

    // A fill callback that records entry names into a Vec threaded through
    // the opaque buffer pointer, reporting "full" after two entries.
    unsafe extern "C" fn record_entry(
        buf: *mut c_void,
        name: *const c_char,
        _stat: *const libc::stat,
        _offset: libc::off_t,
        _flags: c_int,
    ) -> c_int {
        let entries = unsafe { &mut *(buf as *mut Vec<String>) };
        if entries.len() >= 2 {
            return 1;
        }
        let name = unsafe { std::ffi::CStr::from_ptr(name) };
        entries.push(name.to_string_lossy().into_owned());
        0
    }

    #[test]
    fn dir_filler_forwards_until_full() {
        let mut entries: Vec<String> = Vec::new();
        let buf = &mut entries as *mut Vec<String> as *mut c_void;
        let mut filler = DirFiller::new(buf, Some(record_entry));

        assert!(filler.add(OsStr::new("."), None, 0, FillDirFlags::empty()));
        assert!(filler.add(OsStr::new("hello"), None, 0, FillDirFlags::empty()));
        // Third entry hits the two-entry capacity of the fake host buffer.
        assert!(!filler.add(OsStr::new("world"), None, 0, FillDirFlags::empty()));
        assert_eq!(entries, vec![".".to_string(), "hello".to_string()]);
    }

    #[test]
    fn dir_filler_skips_interior_nul_names() {
        let mut entries: Vec<String> = Vec::new();
        let buf = &mut entries as *mut Vec<String> as *mut c_void;
        let mut filler = DirFiller::new(buf, Some(record_entry));

        let bad = OsStr::from_bytes(b"ba\0d");
        assert!(filler.add(bad, None, 0, FillDirFlags::empty()));
        assert!(entries.is_empty());
    }
}
