//! Loaded module images
//!
//! Describes where a host module's executable code lives so signatures can
//! be scanned without touching unmapped or non-code pages.

use super::error::HookError;

/// A contiguous executable range of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRange {
    pub start: usize,
    pub len: usize,
}

impl CodeRange {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.start && address < self.end()
    }
}

/// Executable layout of one loaded module
#[derive(Debug, Clone)]
pub struct ModuleImage {
    name: String,
    base: usize,
    ranges: Vec<CodeRange>,
}

impl ModuleImage {
    /// Build an image from explicit ranges
    ///
    /// # Safety
    /// Every range must be readable for as long as the image is scanned.
    pub unsafe fn from_ranges(name: impl Into<String>, base: usize, ranges: Vec<CodeRange>) -> Self {
        Self {
            name: name.into(),
            base,
            ranges,
        }
    }

    /// The main executable of the host process
    pub fn main() -> Result<Self, HookError> {
        platform::enumerate()?
            .into_iter()
            .next()
            .ok_or_else(|| HookError::ModuleNotFound("<main executable>".to_string()))
    }

    /// A loaded module whose file name starts with `name`
    pub fn by_name(name: &str) -> Result<Self, HookError> {
        platform::enumerate()?
            .into_iter()
            .find(|image| image.file_name().starts_with(name))
            .ok_or_else(|| HookError::ModuleNotFound(name.to_string()))
    }

    /// Full path (or name) of the module
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name component of the module path
    pub fn file_name(&self) -> &str {
        self.name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(&self.name)
    }

    /// Load base of the module
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn ranges(&self) -> &[CodeRange] {
        &self.ranges
    }

    /// Whether `address` lies in executable code of this module
    pub fn contains(&self, address: usize) -> bool {
        self.ranges.iter().any(|range| range.contains(address))
    }

    /// Bytes of a range
    pub(crate) fn range_bytes(&self, range: &CodeRange) -> &[u8] {
        // SAFETY: ranges are readable by construction (see `from_ranges`)
        unsafe { std::slice::from_raw_parts(range.start as *const u8, range.len) }
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::ffi::{c_int, c_void, CStr};

    use super::{CodeRange, HookError, ModuleImage};

    /// Enumerate loaded objects via `dl_iterate_phdr`, main executable first
    pub fn enumerate() -> Result<Vec<ModuleImage>, HookError> {
        let mut images: Vec<ModuleImage> = Vec::new();

        unsafe extern "C" fn callback(
            info: *mut libc::dl_phdr_info,
            _size: libc::size_t,
            data: *mut c_void,
        ) -> c_int {
            let images = &mut *(data as *mut Vec<ModuleImage>);
            let info = &*info;

            let name = if info.dlpi_name.is_null() || *info.dlpi_name == 0 {
                std::fs::read_link("/proc/self/exe")
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                CStr::from_ptr(info.dlpi_name).to_string_lossy().into_owned()
            };

            let base = info.dlpi_addr as usize;
            let phdrs = std::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize);
            let ranges = phdrs
                .iter()
                .filter(|phdr| {
                    phdr.p_type == libc::PT_LOAD && phdr.p_flags & libc::PF_X != 0 && phdr.p_memsz > 0
                })
                .map(|phdr| CodeRange {
                    start: base + phdr.p_vaddr as usize,
                    len: phdr.p_memsz as usize,
                })
                .collect();

            images.push(ModuleImage { name, base, ranges });
            0
        }

        unsafe {
            libc::dl_iterate_phdr(Some(callback), &mut images as *mut Vec<ModuleImage> as *mut c_void);
        }

        Ok(images)
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use super::{HookError, ModuleImage};

    pub fn enumerate() -> Result<Vec<ModuleImage>, HookError> {
        Err(HookError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_range_contains() {
        let range = CodeRange {
            start: 0x1000,
            len: 0x100,
        };
        assert!(range.contains(0x1000));
        assert!(range.contains(0x10FF));
        assert!(!range.contains(0x1100));
    }

    #[test]
    fn test_file_name() {
        let image = unsafe { ModuleImage::from_ranges("/opt/game/bin/Hades2.exe", 0, Vec::new()) };
        assert_eq!(image.file_name(), "Hades2.exe");

        let image = unsafe { ModuleImage::from_ranges("C:\\Game\\Hades2.exe", 0, Vec::new()) };
        assert_eq!(image.file_name(), "Hades2.exe");
    }

    #[inline(never)]
    fn marker() -> u32 {
        std::hint::black_box(42)
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_main_image_contains_own_code() {
        let image = ModuleImage::main().unwrap();
        assert!(!image.ranges().is_empty());
        assert!(image.contains(marker as usize));
    }
}
