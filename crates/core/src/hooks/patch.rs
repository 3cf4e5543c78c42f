//! Code patch sites
//!
//! A [`PatchSite`] captures everything needed to overwrite a few bytes of
//! code: the address, the length and the protection to restore afterwards.
//! Capturing happens ahead of time so that [`PatchSite::write`] can run inside
//! a suspension window without allocating.

use super::error::HookError;

/// Result of a successful [`PatchSite::write`]
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Restored,
    /// The bytes were written but the page stayed writable
    ProtectionLeft,
}

/// A span of code that can be overwritten in place
#[derive(Debug, Clone, Copy)]
pub struct PatchSite {
    address: usize,
    len: usize,
    protection: region::Protection,
}

impl PatchSite {
    /// Capture the current protection of `len` bytes at `address`
    pub fn query(address: usize, len: usize) -> Result<Self, HookError> {
        if address == 0 || len == 0 {
            return Err(HookError::InvalidAddress(address));
        }

        let current = region::query(address as *const u8)?;

        Ok(Self {
            address,
            len,
            protection: current.protection(),
        })
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Copy the bytes currently at the site
    ///
    /// # Safety
    /// The site must still be mapped.
    pub unsafe fn read(&self) -> Vec<u8> {
        std::slice::from_raw_parts(self.address as *const u8, self.len).to_vec()
    }

    /// Overwrite the site with `bytes`
    ///
    /// Does not allocate or log, so errors carry only the address. A failure
    /// to restore the original protection does not undo the write; it is
    /// reported through [`PatchOutcome`] for the caller to log later.
    ///
    /// # Safety
    /// No other thread may be executing the site, and `bytes` must be valid
    /// code for it.
    pub unsafe fn write(&self, bytes: &[u8]) -> Result<PatchOutcome, HookError> {
        if bytes.len() != self.len {
            return Err(HookError::PatchFailed(self.address));
        }

        region::protect(
            self.address as *const u8,
            self.len,
            region::Protection::READ_WRITE_EXECUTE,
        )
        .map_err(|_| HookError::PatchFailed(self.address))?;

        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.address as *mut u8, self.len);

        match region::protect(self.address as *const u8, self.len, self.protection) {
            Ok(()) => Ok(PatchOutcome::Restored),
            Err(_) => Ok(PatchOutcome::ProtectionLeft),
        }
    }
}
