//! Session-bound memory regions.

#![allow(unsafe_code)]

use std::fmt;
use std::ptr::{self, NonNull};

use lifespan_core::SessionError;

use crate::session::Session;

/// A contiguous block of memory whose validity is tied to a session.
///
/// Every access goes through the session's access check: it fails with
/// `AlreadyClosed` once the session is closed and with `WrongThread`
/// from a thread the session does not admit. On shared sessions each
/// access is bracketed so that a concurrent close waits for it to finish
/// before the memory is released.
pub struct Region {
    session: Session,
    ptr: NonNull<u8>,
    size: usize,
    align: usize,
}

// SAFETY: the region only dereferences `ptr` inside the session's access
// check, which enforces the session's threading discipline.
unsafe impl Send for Region {}
// SAFETY: as above; mutation requires `&mut Region`.
unsafe impl Sync for Region {}

impl Region {
    /// Wrap raw memory as a region of `session`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes, aligned
    /// to `align`, for as long as `session` is open. No other live region
    /// may overlap it while either is written.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, size: usize, align: usize, session: Session) -> Self {
        Self {
            session,
            ptr,
            size,
            align,
        }
    }

    /// A sub-range of this region, re-associated with `session`.
    ///
    /// # Safety
    ///
    /// The memory must remain valid for as long as `session` is open,
    /// which this region's own session does not guarantee. No other live
    /// region may overlap the result while either is written.
    pub unsafe fn reinterpret(
        &self,
        offset: usize,
        size: usize,
        align: usize,
        session: Session,
    ) -> Result<Region, SessionError> {
        self.check_bounds(offset, size)?;
        // SAFETY: in bounds; validity is the caller's contract.
        let ptr = unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) };
        // SAFETY: forwarded from the caller.
        Ok(unsafe { Region::from_raw_parts(ptr, size, align, session) })
    }

    /// The session that controls this region's lifetime.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Start address.
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Length in bytes.
    pub fn byte_size(&self) -> usize {
        self.size
    }

    /// Requested alignment.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Whether the calling thread may access the region right now.
    pub fn is_accessible(&self) -> bool {
        self.session.check_accessible().is_ok()
    }

    /// Check that the calling thread may access the region.
    pub fn check_access(&self) -> Result<(), SessionError> {
        self.session.check_accessible()
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<(), SessionError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(SessionError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<(), SessionError> {
        self.check_bounds(offset, dst.len())?;
        self.session.access(|| {
            // SAFETY: bounds checked; the session is open for the
            // duration of the access.
            unsafe {
                ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
            }
        })
    }

    /// Copy `src` into the region starting at `offset`.
    pub fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<(), SessionError> {
        self.check_bounds(offset, src.len())?;
        let ptr = self.ptr;
        self.session.access(|| {
            // SAFETY: bounds checked; exclusive through `&mut self`.
            unsafe {
                ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr().add(offset), src.len());
            }
        })
    }

    /// Set every byte of the region to `value`.
    pub fn fill(&mut self, value: u8) -> Result<(), SessionError> {
        let (ptr, size) = (self.ptr, self.size);
        self.session.access(|| {
            // SAFETY: whole region; exclusive through `&mut self`.
            unsafe { ptr::write_bytes(ptr.as_ptr(), value, size) };
        })
    }

    /// Copy the whole region into a new vector.
    pub fn to_vec(&self) -> Result<Vec<u8>, SessionError> {
        let mut out = vec![0; self.size];
        self.read_bytes(0, &mut out)?;
        Ok(out)
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("size", &self.size)
            .field("align", &self.align)
            .field("session", &self.session.id())
            .finish()
    }
}

/// Something that hands out session-bound regions.
pub trait SegmentAllocator {
    /// Failure type; must absorb session errors.
    type Error: From<SessionError>;

    /// Allocate `size` bytes aligned to `align`. Contents are
    /// unspecified.
    fn allocate(&self, size: usize, align: usize) -> Result<Region, Self::Error>;

    /// Allocate `size` bytes aligned to `align`, all set to zero.
    fn allocate_zeroed(&self, size: usize, align: usize) -> Result<Region, Self::Error> {
        let mut region = self.allocate(size, align)?;
        region.fill(0)?;
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let session = Session::confined();
        let mut region = session.allocate(16, 8).unwrap();
        region.write_bytes(4, &[1, 2, 3]).unwrap();
        let mut out = [0u8; 3];
        region.read_bytes(4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(region.byte_size(), 16);
        assert_eq!(region.address() % 8, 0);
    }

    #[test]
    fn out_of_bounds_is_rejected() {
        let session = Session::shared();
        let mut region = session.allocate(8, 1).unwrap();
        assert_eq!(
            region.write_bytes(6, &[0; 4]),
            Err(SessionError::OutOfBounds {
                offset: 6,
                len: 4,
                size: 8,
            })
        );
        let mut big = [0u8; 2];
        assert!(region.read_bytes(usize::MAX, &mut big).is_err());
    }

    #[test]
    fn access_after_close_fails() {
        let session = Session::shared();
        let region = session.allocate_zeroed(32, 8).unwrap();
        assert_eq!(region.to_vec().unwrap(), vec![0; 32]);
        session.close().unwrap();
        assert!(!region.is_accessible());
        assert!(region.to_vec().unwrap_err().is_closed());
    }

    #[test]
    fn reinterpret_checks_bounds() {
        let session = Session::confined();
        let region = session.allocate(64, 16).unwrap();
        // SAFETY: `session` owns both and outlives every access here.
        let sub = unsafe { region.reinterpret(16, 16, 1, session.clone()) }.unwrap();
        assert_eq!(sub.address(), region.address() + 16);
        // SAFETY: never dereferenced.
        let bad = unsafe { region.reinterpret(60, 8, 1, session.clone()) };
        assert!(matches!(bad, Err(SessionError::OutOfBounds { .. })));
    }
}
