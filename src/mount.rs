//! Mount lifecycle: the [`Fuse`] adapter and the active-mount registration
//! the per-call context resolver reads.
//!
//! The adapter has two states. *Unmounted*: constructed, table fetched, the
//! owner slot empty. *Mounted*: strictly inside [`Fuse::run`], the owner slot
//! holding the handler. The slot is claimed once on entry to the host and
//! read-only until the host returns, so per-call resolution is a single
//! atomic load.

use std::ffi::{CString, OsString, c_char, c_void};
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::handler::Filesystem;
use crate::sys::{self, FuseOperations};
use crate::table::operations_for;

// Single-owner slot for the one active mount of this process. The callback
// table is shared by every instance of a handler type; this is what ties a
// call back to the instance that issued the mount.
static ACTIVE: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

pub(crate) fn claim(handler: *mut c_void) -> bool {
    ACTIVE
        .compare_exchange(
            ptr::null_mut(),
            handler,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
}

pub(crate) fn release() {
    ACTIVE.store(ptr::null_mut(), Ordering::Release);
}

pub(crate) fn active_raw() -> *mut c_void {
    ACTIVE.load(Ordering::Acquire)
}

/// Recovers the handler instance of the active mount.
///
/// # Safety
/// Only meaningful between a successful [`claim`] for an instance of `T` and
/// the matching [`release`]; the host upholds this by construction, since
/// the forwarding entries that call here are only reachable through a table
/// handed to it inside [`Fuse::run`]. Called outside an active mount this is
/// a caller invariant violation.
pub(crate) unsafe fn resolve<'a, T: Filesystem>() -> &'a T {
    let raw = active_raw() as *const T;
    debug_assert!(
        !raw.is_null(),
        "operation callback invoked outside an active mount"
    );
    unsafe { &*raw }
}

/// The dispatch adapter tying one handler instance to the host runtime.
///
/// ```ignore
/// let mut fuse = Fuse::new(MyFs::default());
/// let status = fuse.run(std::env::args_os())?;
/// std::process::exit(status);
/// ```
pub struct Fuse<T: Filesystem> {
    // Boxed so the address the host threads call back into stays stable.
    handler: Box<T>,
    ops: &'static FuseOperations,
}

impl<T: Filesystem> Fuse<T> {
    pub fn new(handler: T) -> Self {
        Self {
            handler: Box::new(handler),
            ops: operations_for::<T>(),
        }
    }

    pub fn handler(&self) -> &T {
        &self.handler
    }

    /// The callback table shared by every instance of `T`.
    pub fn operations(&self) -> &'static FuseOperations {
        self.ops
    }

    /// Hands the argument vector and the callback table to the host runtime
    /// and blocks until the mount is torn down (unmount, fatal error, or a
    /// signal handled by the host). Returns the host's exit status
    /// unchanged; the caller is expected to use it as the process exit code.
    ///
    /// `args` is the full process argument vector, program name included;
    /// mountpoint and options are parsed by the host, not here.
    ///
    /// Fails before entering the host if an argument carries an interior
    /// NUL byte, or if this process already has an active mount.
    pub fn run<I, A>(&mut self, args: I) -> io::Result<i32>
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        let _ = env_logger::try_init();

        let argv: Vec<CString> = args
            .into_iter()
            .map(|arg| {
                CString::new(arg.into().into_vec()).map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "argument contains an interior NUL byte",
                    )
                })
            })
            .collect::<io::Result<_>>()?;
        // C argv convention: NULL-terminated, argc excludes the terminator.
        let mut argv_ptrs: Vec<*mut c_char> = argv
            .iter()
            .map(|arg| arg.as_ptr() as *mut c_char)
            .collect();
        argv_ptrs.push(ptr::null_mut());
        let argc = argv.len() as i32;

        let raw = &mut *self.handler as *mut T as *mut c_void;
        if !claim(raw) {
            return Err(io::Error::other(
                "this process already has an active mount",
            ));
        }

        debug!("entering host loop ({} args)", argc);
        let status = unsafe {
            sys::fuse_main_real(
                argc,
                argv_ptrs.as_mut_ptr(),
                self.ops,
                std::mem::size_of::<FuseOperations>(),
                raw,
            )
        };
        release();
        debug!("host loop exited with status {status}");
        Ok(status)
    }
}

#[cfg(test)]
pub(crate) fn test_slot_guard() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, PoisonError};
    static SERIAL: Mutex<()> = Mutex::new(());
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::OpSet;

    struct NullFs;

    impl Filesystem for NullFs {
        const CAPABILITIES: OpSet = OpSet::GETATTR;
    }

    #[test]
    fn adapter_exposes_the_per_type_table() {
        let fuse = Fuse::new(NullFs);
        assert_eq!(fuse.operations().populated(), OpSet::GETATTR);
        assert!(std::ptr::eq(fuse.operations(), operations_for::<NullFs>()));
    }

    #[test]
    fn owner_slot_is_exclusive_until_released() {
        let _serial = test_slot_guard();

        let mut a = NullFs;
        let mut b = NullFs;
        let pa = &mut a as *mut NullFs as *mut c_void;
        let pb = &mut b as *mut NullFs as *mut c_void;

        assert!(claim(pa));
        assert_eq!(active_raw(), pa);
        // A second mount attempt in the same process must not steal the slot.
        assert!(!claim(pb));
        assert_eq!(active_raw(), pa);

        release();
        assert!(active_raw().is_null());
        assert!(claim(pb));
        release();
    }

    #[test]
    fn resolver_returns_the_claimed_instance() {
        let _serial = test_slot_guard();

        let fs = NullFs;
        assert!(claim(&fs as *const NullFs as *mut c_void));
        let resolved: &NullFs = unsafe { resolve::<NullFs>() };
        assert!(std::ptr::eq(resolved, &fs));
        release();
    }
}
