//! Callback-table construction.
//!
//! One table per handler *type*, built lazily on first use and immutable
//! afterwards. A slot is populated with a monomorphized forwarding entry iff
//! the type declares the operation in its capability set; everything else is
//! left at `None`, the host's "not implemented" sentinel. The host treats an
//! empty slot differently from one that always fails (it can skip
//! kernel-side bookkeeping entirely), so absent must stay absent.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::ffi::{CStr, OsStr, c_char};
use std::os::unix::ffi::OsStrExt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::slice;
use std::sync::{Mutex, OnceLock, PoisonError};

use crate::handler::{Filesystem, OpSet};
use crate::sys::FuseOperations;

impl FuseOperations {
    /// The set of populated slots, one flag per non-`None` entry.
    pub fn populated(&self) -> OpSet {
        let mut set = OpSet::empty();
        set.set(OpSet::GETATTR, self.getattr.is_some());
        set.set(OpSet::READLINK, self.readlink.is_some());
        set.set(OpSet::MKNOD, self.mknod.is_some());
        set.set(OpSet::MKDIR, self.mkdir.is_some());
        set.set(OpSet::UNLINK, self.unlink.is_some());
        set.set(OpSet::RMDIR, self.rmdir.is_some());
        set.set(OpSet::SYMLINK, self.symlink.is_some());
        set.set(OpSet::RENAME, self.rename.is_some());
        set.set(OpSet::LINK, self.link.is_some());
        set.set(OpSet::CHMOD, self.chmod.is_some());
        set.set(OpSet::CHOWN, self.chown.is_some());
        set.set(OpSet::TRUNCATE, self.truncate.is_some());
        set.set(OpSet::OPEN, self.open.is_some());
        set.set(OpSet::READ, self.read.is_some());
        set.set(OpSet::WRITE, self.write.is_some());
        set.set(OpSet::STATFS, self.statfs.is_some());
        set.set(OpSet::FLUSH, self.flush.is_some());
        set.set(OpSet::RELEASE, self.release.is_some());
        set.set(OpSet::FSYNC, self.fsync.is_some());
        set.set(OpSet::SETXATTR, self.setxattr.is_some());
        set.set(OpSet::GETXATTR, self.getxattr.is_some());
        set.set(OpSet::LISTXATTR, self.listxattr.is_some());
        set.set(OpSet::REMOVEXATTR, self.removexattr.is_some());
        set.set(OpSet::OPENDIR, self.opendir.is_some());
        set.set(OpSet::READDIR, self.readdir.is_some());
        set.set(OpSet::RELEASEDIR, self.releasedir.is_some());
        set.set(OpSet::FSYNCDIR, self.fsyncdir.is_some());
        set.set(OpSet::INIT, self.init.is_some());
        set.set(OpSet::DESTROY, self.destroy.is_some());
        set.set(OpSet::ACCESS, self.access.is_some());
        set.set(OpSet::CREATE, self.create.is_some());
        set.set(OpSet::LOCK, self.lock.is_some());
        set.set(OpSet::UTIMENS, self.utimens.is_some());
        set.set(OpSet::BMAP, self.bmap.is_some());
        set.set(OpSet::IOCTL, self.ioctl.is_some());
        set.set(OpSet::POLL, self.poll.is_some());
        set.set(OpSet::WRITE_BUF, self.write_buf.is_some());
        set.set(OpSet::READ_BUF, self.read_buf.is_some());
        set.set(OpSet::FLOCK, self.flock.is_some());
        set.set(OpSet::FALLOCATE, self.fallocate.is_some());
        set.set(OpSet::COPY_FILE_RANGE, self.copy_file_range.is_some());
        set.set(OpSet::LSEEK, self.lseek.is_some());
        set
    }
}

/// Returns the callback table for `T`, building it on first use.
///
/// Tables are keyed by `TypeId` and leaked to `'static`: the shape is a
/// property of the type, shared by every instance, and never rebuilt. The
/// registry lock makes concurrent first use build exactly once.
pub fn operations_for<T: Filesystem>() -> &'static FuseOperations {
    static REGISTRY: OnceLock<Mutex<HashMap<TypeId, &'static FuseOperations>>> = OnceLock::new();
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
    registry
        .entry(TypeId::of::<T>())
        .or_insert_with(|| Box::leak(Box::new(build::<T>())))
}

fn build<T: Filesystem>() -> FuseOperations {
    let caps = T::CAPABILITIES;
    let mut ops = FuseOperations::default();
    if caps.contains(OpSet::GETATTR) {
        ops.getattr = Some(forward::getattr::<T>);
    }
    if caps.contains(OpSet::READLINK) {
        ops.readlink = Some(forward::readlink::<T>);
    }
    if caps.contains(OpSet::MKNOD) {
        ops.mknod = Some(forward::mknod::<T>);
    }
    if caps.contains(OpSet::MKDIR) {
        ops.mkdir = Some(forward::mkdir::<T>);
    }
    if caps.contains(OpSet::UNLINK) {
        ops.unlink = Some(forward::unlink::<T>);
    }
    if caps.contains(OpSet::RMDIR) {
        ops.rmdir = Some(forward::rmdir::<T>);
    }
    if caps.contains(OpSet::SYMLINK) {
        ops.symlink = Some(forward::symlink::<T>);
    }
    if caps.contains(OpSet::RENAME) {
        ops.rename = Some(forward::rename::<T>);
    }
    if caps.contains(OpSet::LINK) {
        ops.link = Some(forward::link::<T>);
    }
    if caps.contains(OpSet::CHMOD) {
        ops.chmod = Some(forward::chmod::<T>);
    }
    if caps.contains(OpSet::CHOWN) {
        ops.chown = Some(forward::chown::<T>);
    }
    if caps.contains(OpSet::TRUNCATE) {
        ops.truncate = Some(forward::truncate::<T>);
    }
    if caps.contains(OpSet::OPEN) {
        ops.open = Some(forward::open::<T>);
    }
    if caps.contains(OpSet::READ) {
        ops.read = Some(forward::read::<T>);
    }
    if caps.contains(OpSet::WRITE) {
        ops.write = Some(forward::write::<T>);
    }
    if caps.contains(OpSet::STATFS) {
        ops.statfs = Some(forward::statfs::<T>);
    }
    if caps.contains(OpSet::FLUSH) {
        ops.flush = Some(forward::flush::<T>);
    }
    if caps.contains(OpSet::RELEASE) {
        ops.release = Some(forward::release::<T>);
    }
    if caps.contains(OpSet::FSYNC) {
        ops.fsync = Some(forward::fsync::<T>);
    }
    if caps.contains(OpSet::SETXATTR) {
        ops.setxattr = Some(forward::setxattr::<T>);
    }
    if caps.contains(OpSet::GETXATTR) {
        ops.getxattr = Some(forward::getxattr::<T>);
    }
    if caps.contains(OpSet::LISTXATTR) {
        ops.listxattr = Some(forward::listxattr::<T>);
    }
    if caps.contains(OpSet::REMOVEXATTR) {
        ops.removexattr = Some(forward::removexattr::<T>);
    }
    if caps.contains(OpSet::OPENDIR) {
        ops.opendir = Some(forward::opendir::<T>);
    }
    if caps.contains(OpSet::READDIR) {
        ops.readdir = Some(forward::readdir::<T>);
    }
    if caps.contains(OpSet::RELEASEDIR) {
        ops.releasedir = Some(forward::releasedir::<T>);
    }
    if caps.contains(OpSet::FSYNCDIR) {
        ops.fsyncdir = Some(forward::fsyncdir::<T>);
    }
    if caps.contains(OpSet::INIT) {
        ops.init = Some(forward::init::<T>);
    }
    if caps.contains(OpSet::DESTROY) {
        ops.destroy = Some(forward::destroy::<T>);
    }
    if caps.contains(OpSet::ACCESS) {
        ops.access = Some(forward::access::<T>);
    }
    if caps.contains(OpSet::CREATE) {
        ops.create = Some(forward::create::<T>);
    }
    if caps.contains(OpSet::LOCK) {
        ops.lock = Some(forward::lock::<T>);
    }
    if caps.contains(OpSet::UTIMENS) {
        ops.utimens = Some(forward::utimens::<T>);
    }
    if caps.contains(OpSet::BMAP) {
        ops.bmap = Some(forward::bmap::<T>);
    }
    if caps.contains(OpSet::IOCTL) {
        ops.ioctl = Some(forward::ioctl::<T>);
    }
    if caps.contains(OpSet::POLL) {
        ops.poll = Some(forward::poll::<T>);
    }
    if caps.contains(OpSet::WRITE_BUF) {
        ops.write_buf = Some(forward::write_buf::<T>);
    }
    if caps.contains(OpSet::READ_BUF) {
        ops.read_buf = Some(forward::read_buf::<T>);
    }
    if caps.contains(OpSet::FLOCK) {
        ops.flock = Some(forward::flock::<T>);
    }
    if caps.contains(OpSet::FALLOCATE) {
        ops.fallocate = Some(forward::fallocate::<T>);
    }
    if caps.contains(OpSet::COPY_FILE_RANGE) {
        ops.copy_file_range = Some(forward::copy_file_range::<T>);
    }
    if caps.contains(OpSet::LSEEK) {
        ops.lseek = Some(forward::lseek::<T>);
    }
    debug!(
        "built callback table for {}: {:?}",
        type_name::<T>(),
        ops.populated()
    );
    ops
}

/// Runs a forwarding body, converting a handler panic into `fallback`
/// instead of unwinding into the host's C frames.
fn catch<R>(fallback: R, body: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(v) => v,
        Err(_) => {
            error!("filesystem handler panicked; reporting EIO to the host");
            fallback
        }
    }
}

/// Borrows a host-supplied NUL-terminated path as `&Path` without copying.
///
/// # Safety
/// `path` must point at a valid C string that outlives the call. The host
/// guarantees this for every operation; `nullpath_ok` is never enabled by
/// this crate, so paths are never NULL.
unsafe fn host_path<'a>(path: *const c_char) -> &'a Path {
    Path::new(OsStr::from_bytes(unsafe { CStr::from_ptr(path) }.to_bytes()))
}

unsafe fn host_name<'a>(name: *const c_char) -> &'a OsStr {
    OsStr::from_bytes(unsafe { CStr::from_ptr(name) }.to_bytes())
}

unsafe fn host_bytes<'a>(ptr: *const c_char, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(ptr as *const u8, len) }
    }
}

unsafe fn host_bytes_mut<'a>(ptr: *mut c_char, len: usize) -> &'a mut [u8] {
    if ptr.is_null() || len == 0 {
        &mut []
    } else {
        unsafe { slice::from_raw_parts_mut(ptr as *mut u8, len) }
    }
}

/// Forwarding entries: exact host signatures, monomorphized per handler
/// type. Each resolves the active instance, calls the handler method with
/// the call's arguments in host order, and returns the result verbatim.
mod forward {
    use std::ffi::{c_char, c_int, c_uint, c_void};

    use super::{catch, host_bytes, host_bytes_mut, host_name, host_path};
    use crate::handler::{DirFiller, Filesystem, ReadDirFlags, RenameFlags};
    use crate::mount;
    use crate::sys::{BufVec, ConnInfo, FileInfo, FillDir, FuseConfig, PollHandle};

    pub(super) unsafe extern "C" fn getattr<T: Filesystem>(
        path: *const c_char,
        stat: *mut libc::stat,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().getattr(host_path(path), &mut *stat, fi.as_mut())
        })
    }

    pub(super) unsafe extern "C" fn readlink<T: Filesystem>(
        path: *const c_char,
        buf: *mut c_char,
        size: usize,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().readlink(host_path(path), host_bytes_mut(buf, size))
        })
    }

    pub(super) unsafe extern "C" fn mknod<T: Filesystem>(
        path: *const c_char,
        mode: libc::mode_t,
        dev: libc::dev_t,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().mknod(host_path(path), mode, dev)
        })
    }

    pub(super) unsafe extern "C" fn mkdir<T: Filesystem>(
        path: *const c_char,
        mode: libc::mode_t,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().mkdir(host_path(path), mode)
        })
    }

    pub(super) unsafe extern "C" fn unlink<T: Filesystem>(path: *const c_char) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().unlink(host_path(path))
        })
    }

    pub(super) unsafe extern "C" fn rmdir<T: Filesystem>(path: *const c_char) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().rmdir(host_path(path))
        })
    }

    pub(super) unsafe extern "C" fn symlink<T: Filesystem>(
        target: *const c_char,
        link: *const c_char,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().symlink(host_path(target), host_path(link))
        })
    }

    pub(super) unsafe extern "C" fn rename<T: Filesystem>(
        from: *const c_char,
        to: *const c_char,
        flags: c_uint,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().rename(
                host_path(from),
                host_path(to),
                RenameFlags::from_bits_retain(flags),
            )
        })
    }

    pub(super) unsafe extern "C" fn link<T: Filesystem>(
        from: *const c_char,
        to: *const c_char,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().link(host_path(from), host_path(to))
        })
    }

    pub(super) unsafe extern "C" fn chmod<T: Filesystem>(
        path: *const c_char,
        mode: libc::mode_t,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().chmod(host_path(path), mode, fi.as_mut())
        })
    }

    pub(super) unsafe extern "C" fn chown<T: Filesystem>(
        path: *const c_char,
        uid: libc::uid_t,
        gid: libc::gid_t,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().chown(host_path(path), uid, gid, fi.as_mut())
        })
    }

    pub(super) unsafe extern "C" fn truncate<T: Filesystem>(
        path: *const c_char,
        size: libc::off_t,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().truncate(host_path(path), size, fi.as_mut())
        })
    }

    pub(super) unsafe extern "C" fn open<T: Filesystem>(
        path: *const c_char,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().open(host_path(path), &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn read<T: Filesystem>(
        path: *const c_char,
        buf: *mut c_char,
        size: usize,
        offset: libc::off_t,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().read(host_path(path), host_bytes_mut(buf, size), offset, &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn write<T: Filesystem>(
        path: *const c_char,
        buf: *const c_char,
        size: usize,
        offset: libc::off_t,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().write(host_path(path), host_bytes(buf, size), offset, &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn statfs<T: Filesystem>(
        path: *const c_char,
        stat: *mut libc::statvfs,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().statfs(host_path(path), &mut *stat)
        })
    }

    pub(super) unsafe extern "C" fn flush<T: Filesystem>(
        path: *const c_char,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().flush(host_path(path), &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn release<T: Filesystem>(
        path: *const c_char,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().release(host_path(path), &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn fsync<T: Filesystem>(
        path: *const c_char,
        datasync: c_int,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().fsync(host_path(path), datasync, &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn setxattr<T: Filesystem>(
        path: *const c_char,
        name: *const c_char,
        value: *const c_char,
        size: usize,
        flags: c_int,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().setxattr(
                host_path(path),
                host_name(name),
                host_bytes(value, size),
                flags,
            )
        })
    }

    pub(super) unsafe extern "C" fn getxattr<T: Filesystem>(
        path: *const c_char,
        name: *const c_char,
        buf: *mut c_char,
        size: usize,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().getxattr(host_path(path), host_name(name), host_bytes_mut(buf, size))
        })
    }

    pub(super) unsafe extern "C" fn listxattr<T: Filesystem>(
        path: *const c_char,
        buf: *mut c_char,
        size: usize,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().listxattr(host_path(path), host_bytes_mut(buf, size))
        })
    }

    pub(super) unsafe extern "C" fn removexattr<T: Filesystem>(
        path: *const c_char,
        name: *const c_char,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().removexattr(host_path(path), host_name(name))
        })
    }

    pub(super) unsafe extern "C" fn opendir<T: Filesystem>(
        path: *const c_char,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().opendir(host_path(path), &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn readdir<T: Filesystem>(
        path: *const c_char,
        buf: *mut c_void,
        fill: FillDir,
        offset: libc::off_t,
        fi: *mut FileInfo,
        flags: c_int,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            let mut filler = DirFiller::new(buf, fill);
            mount::resolve::<T>().readdir(
                host_path(path),
                &mut filler,
                offset,
                &mut *fi,
                ReadDirFlags::from_bits_retain(flags as u32),
            )
        })
    }

    pub(super) unsafe extern "C" fn releasedir<T: Filesystem>(
        path: *const c_char,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().releasedir(host_path(path), &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn fsyncdir<T: Filesystem>(
        path: *const c_char,
        datasync: c_int,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().fsyncdir(host_path(path), datasync, &mut *fi)
        })
    }

    // init must hand the host back its private data pointer; that stays the
    // registered instance whether or not the handler's hook panics.
    pub(super) unsafe extern "C" fn init<T: Filesystem>(
        conn: *mut ConnInfo,
        config: *mut FuseConfig,
    ) -> *mut c_void {
        catch((), || unsafe {
            mount::resolve::<T>().init(&mut *conn, &mut *config);
        });
        mount::active_raw()
    }

    pub(super) unsafe extern "C" fn destroy<T: Filesystem>(_private: *mut c_void) {
        catch((), || unsafe { mount::resolve::<T>().destroy() });
    }

    pub(super) unsafe extern "C" fn access<T: Filesystem>(
        path: *const c_char,
        mask: c_int,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().access(host_path(path), mask)
        })
    }

    pub(super) unsafe extern "C" fn create<T: Filesystem>(
        path: *const c_char,
        mode: libc::mode_t,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().create(host_path(path), mode, &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn lock<T: Filesystem>(
        path: *const c_char,
        fi: *mut FileInfo,
        cmd: c_int,
        lock: *mut libc::flock,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().lock(host_path(path), &mut *fi, cmd, &mut *lock)
        })
    }

    pub(super) unsafe extern "C" fn utimens<T: Filesystem>(
        path: *const c_char,
        times: *const libc::timespec,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().utimens(
                host_path(path),
                &*(times as *const [libc::timespec; 2]),
                fi.as_mut(),
            )
        })
    }

    pub(super) unsafe extern "C" fn bmap<T: Filesystem>(
        path: *const c_char,
        blocksize: usize,
        idx: *mut u64,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().bmap(host_path(path), blocksize, &mut *idx)
        })
    }

    pub(super) unsafe extern "C" fn ioctl<T: Filesystem>(
        path: *const c_char,
        cmd: c_uint,
        arg: *mut c_void,
        fi: *mut FileInfo,
        flags: c_uint,
        data: *mut c_void,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().ioctl(host_path(path), cmd, arg, &mut *fi, flags, data)
        })
    }

    pub(super) unsafe extern "C" fn poll<T: Filesystem>(
        path: *const c_char,
        fi: *mut FileInfo,
        handle: *mut PollHandle,
        revents: *mut c_uint,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().poll(host_path(path), &mut *fi, handle, &mut *revents)
        })
    }

    pub(super) unsafe extern "C" fn write_buf<T: Filesystem>(
        path: *const c_char,
        buf: *mut BufVec,
        offset: libc::off_t,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().write_buf(host_path(path), buf, offset, &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn read_buf<T: Filesystem>(
        path: *const c_char,
        bufp: *mut *mut BufVec,
        size: usize,
        offset: libc::off_t,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().read_buf(host_path(path), bufp, size, offset, &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn flock<T: Filesystem>(
        path: *const c_char,
        fi: *mut FileInfo,
        op: c_int,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().flock(host_path(path), &mut *fi, op)
        })
    }

    pub(super) unsafe extern "C" fn fallocate<T: Filesystem>(
        path: *const c_char,
        mode: c_int,
        offset: libc::off_t,
        length: libc::off_t,
        fi: *mut FileInfo,
    ) -> c_int {
        catch(-libc::EIO, || unsafe {
            mount::resolve::<T>().fallocate(host_path(path), mode, offset, length, &mut *fi)
        })
    }

    pub(super) unsafe extern "C" fn copy_file_range<T: Filesystem>(
        path_in: *const c_char,
        fi_in: *mut FileInfo,
        offset_in: libc::off_t,
        path_out: *const c_char,
        fi_out: *mut FileInfo,
        offset_out: libc::off_t,
        size: usize,
        flags: c_int,
    ) -> isize {
        catch(-libc::EIO as isize, || unsafe {
            mount::resolve::<T>().copy_file_range(
                host_path(path_in),
                &mut *fi_in,
                offset_in,
                host_path(path_out),
                &mut *fi_out,
                offset_out,
                size,
                flags,
            )
        })
    }

    pub(super) unsafe extern "C" fn lseek<T: Filesystem>(
        path: *const c_char,
        offset: libc::off_t,
        whence: c_int,
        fi: *mut FileInfo,
    ) -> libc::off_t {
        catch((-libc::EIO) as libc::off_t, || unsafe {
            mount::resolve::<T>().lseek(host_path(path), offset, whence, &mut *fi)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount;
    use crate::sys::FileInfo;
    use std::ffi::{c_int, c_void};
    use std::mem;
    use std::ptr;
    use std::thread;

    // Minimal read-only filesystem in the spirit of the classic hello
    // example: a root directory with one file.
    struct HelloFs;

    const HELLO_INO: libc::ino_t = 7;
    const HELLO_BODY: &[u8] = b"hello, fuse\n";

    impl Filesystem for HelloFs {
        const CAPABILITIES: OpSet = OpSet::GETATTR.union(OpSet::READ);

        fn getattr(
            &self,
            path: &Path,
            stat: &mut libc::stat,
            _fi: Option<&mut FileInfo>,
        ) -> c_int {
            match path.to_str() {
                Some("/") => {
                    stat.st_mode = libc::S_IFDIR | 0o755;
                    stat.st_nlink = 2;
                    0
                }
                Some("/hello") => {
                    stat.st_mode = libc::S_IFREG | 0o444;
                    stat.st_nlink = 1;
                    stat.st_ino = HELLO_INO;
                    stat.st_size = HELLO_BODY.len() as libc::off_t;
                    0
                }
                _ => -libc::ENOENT,
            }
        }

        fn read(
            &self,
            path: &Path,
            buf: &mut [u8],
            offset: libc::off_t,
            _fi: &mut FileInfo,
        ) -> c_int {
            if path != Path::new("/hello") {
                return -libc::ENOENT;
            }
            let offset = offset as usize;
            if offset >= HELLO_BODY.len() {
                return 0;
            }
            let n = buf.len().min(HELLO_BODY.len() - offset);
            buf[..n].copy_from_slice(&HELLO_BODY[offset..offset + n]);
            n as c_int
        }
    }

    struct Inert;

    impl Filesystem for Inert {
        const CAPABILITIES: OpSet = OpSet::empty();
    }

    #[test]
    fn slots_match_declared_capabilities() {
        let ops = operations_for::<HelloFs>();
        assert_eq!(ops.populated(), OpSet::GETATTR | OpSet::READ);
        assert!(ops.getattr.is_some());
        assert!(ops.read.is_some());
        // Spot-check that nothing else got wired in.
        assert!(ops.open.is_none());
        assert!(ops.readdir.is_none());
        assert!(ops.write.is_none());
        assert!(ops.init.is_none());
        assert!(ops.destroy.is_none());
        assert!(ops.lseek.is_none());
    }

    #[test]
    fn empty_capability_set_builds_an_empty_table() {
        let ops = operations_for::<Inert>();
        assert_eq!(ops.populated(), OpSet::empty());
    }

    #[test]
    fn tables_are_built_once_per_type() {
        let first = operations_for::<HelloFs>();
        let second = operations_for::<HelloFs>();
        assert!(ptr::eq(first, second));
        assert!(!ptr::eq(
            operations_for::<HelloFs>(),
            operations_for::<Inert>()
        ));
    }

    #[test]
    fn concurrent_first_use_yields_one_table() {
        struct Fresh;
        impl Filesystem for Fresh {
            const CAPABILITIES: OpSet = OpSet::GETATTR;
        }

        let tables: Vec<_> = thread::scope(|s| {
            (0..8)
                .map(|_| s.spawn(operations_for::<Fresh>))
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| h.join().expect("builder thread"))
                .collect()
        });
        for t in &tables {
            assert!(ptr::eq(*t, tables[0]));
        }
    }

    #[test]
    fn installed_entries_forward_calls_and_results_verbatim() {
        let _serial = mount::test_slot_guard();

        let fs = HelloFs;
        assert!(mount::claim(&fs as *const HelloFs as *mut c_void));
        let ops = operations_for::<HelloFs>();

        // getattr on a present path fills the caller's stat.
        let mut stat: libc::stat = unsafe { mem::zeroed() };
        let rc = unsafe {
            (ops.getattr.expect("slot"))(c"/hello".as_ptr(), &mut stat, ptr::null_mut())
        };
        assert_eq!(rc, 0);
        assert_eq!(stat.st_ino, HELLO_INO);
        assert_eq!(stat.st_size, HELLO_BODY.len() as libc::off_t);

        // Handler errno comes back untranslated.
        let rc = unsafe {
            (ops.getattr.expect("slot"))(c"/missing".as_ptr(), &mut stat, ptr::null_mut())
        };
        assert_eq!(rc, -libc::ENOENT);

        // read forwards buffer, length and offset unchanged.
        let mut buf = [0u8; 64];
        let mut fi: FileInfo = unsafe { mem::zeroed() };
        let rc = unsafe {
            (ops.read.expect("slot"))(
                c"/hello".as_ptr(),
                buf.as_mut_ptr() as *mut _,
                buf.len(),
                7,
                &mut fi,
            )
        };
        assert_eq!(rc, (HELLO_BODY.len() - 7) as c_int);
        assert_eq!(&buf[..rc as usize], &HELLO_BODY[7..]);

        mount::release();
    }

    #[test]
    fn handler_panic_is_reported_as_eio() {
        struct Panicky;
        impl Filesystem for Panicky {
            const CAPABILITIES: OpSet = OpSet::UNLINK;

            fn unlink(&self, _path: &Path) -> c_int {
                panic!("boom");
            }
        }

        let _serial = mount::test_slot_guard();

        let fs = Panicky;
        assert!(mount::claim(&fs as *const Panicky as *mut c_void));
        let ops = operations_for::<Panicky>();
        let rc = unsafe { (ops.unlink.expect("slot"))(c"/x".as_ptr()) };
        assert_eq!(rc, -libc::EIO);
        mount::release();
    }
}
