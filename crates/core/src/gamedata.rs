//! Gamedata system for loading signatures from JSON
//!
//! Signatures are loaded from a gamedata.json file deployed with the plugin,
//! layered over built-in defaults. This allows updating signatures without
//! recompiling.
//!
//! ```json
//! {
//!     "ScriptManager_Load": { "pattern": "49 3B DF 76 29", "offset": -110 },
//!     "ScriptState": { "pattern": "48 8B 0D ? ? ? ? E8", "offset": 3, "rip_relative": true }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hooks::{self, HookError, ModuleImage, Signature};

/// Errors that can occur when loading or resolving gamedata
#[derive(Debug, Error)]
pub enum GamedataError {
    #[error("Failed to read gamedata file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse gamedata JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Signature not found: {0}")]
    SignatureNotFound(String),

    #[error(transparent)]
    Hook(#[from] HookError),
}

/// One named signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    /// Byte pattern, `?` or `??` for wildcards
    pub pattern: String,
    /// Added to the first match
    #[serde(default)]
    pub offset: i64,
    /// Module file name prefix to scan; the main executable when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Accept the first of several matches
    #[serde(default)]
    pub allow_ambiguous: bool,
    /// The match points at a rel32 displacement; resolve to its target
    #[serde(default)]
    pub rip_relative: bool,
}

impl SignatureEntry {
    pub fn new(pattern: &str, offset: i64) -> Self {
        Self {
            pattern: pattern.to_string(),
            offset,
            module: None,
            allow_ambiguous: false,
            rip_relative: false,
        }
    }

    /// Parsed form of this entry
    pub fn signature(&self) -> Result<Signature, HookError> {
        let offset = isize::try_from(self.offset).map_err(|_| {
            HookError::InvalidSignature(format!("Offset out of range: {}", self.offset))
        })?;
        Ok(Signature::parse(&self.pattern)?
            .with_offset(offset)
            .allow_ambiguous(self.allow_ambiguous))
    }
}

/// Loaded gamedata
#[derive(Debug, Clone, Default)]
pub struct Gamedata {
    signatures: HashMap<String, SignatureEntry>,
}

impl Gamedata {
    /// Signatures known to work with the current host build
    pub fn builtin() -> Self {
        let mut signatures = HashMap::new();
        signatures.insert(
            scripthook_sdk::SCRIPT_MANAGER_LOAD.to_string(),
            SignatureEntry::new("49 3B DF 76 29", -0x6E),
        );
        Self { signatures }
    }

    /// Load gamedata from a JSON file, layered over [`builtin`](Self::builtin)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GamedataError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Load gamedata from a JSON string, layered over [`builtin`](Self::builtin)
    pub fn load_from_str(json: &str) -> Result<Self, GamedataError> {
        let raw: HashMap<String, SignatureEntry> = serde_json::from_str(json)?;

        let mut gamedata = Self::builtin();
        let overridden = raw
            .keys()
            .filter(|name| gamedata.signatures.contains_key(*name))
            .count();
        gamedata.signatures.extend(raw);

        tracing::info!(
            "Loaded gamedata: {} signatures ({} overriding built-ins)",
            gamedata.signatures.len(),
            overridden
        );

        Ok(gamedata)
    }

    /// Load from `path` if it exists, otherwise use the built-ins
    pub fn load_or_builtin<P: AsRef<Path>>(path: P) -> Result<Self, GamedataError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No gamedata at {:?}, using built-in signatures", path);
            Ok(Self::builtin())
        }
    }

    /// Get a signature entry by name
    pub fn get(&self, name: &str) -> Result<&SignatureEntry, GamedataError> {
        self.signatures
            .get(name)
            .ok_or_else(|| GamedataError::SignatureNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signatures.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Resolve a named signature in its module
    pub fn resolve(&self, name: &str) -> Result<usize, GamedataError> {
        let entry = self.get(name)?;
        let image = match &entry.module {
            Some(module) => ModuleImage::by_name(module)?,
            None => ModuleImage::main()?,
        };
        self.resolve_in(name, &image)
    }

    /// Resolve a named signature in a specific image
    pub fn resolve_in(&self, name: &str, image: &ModuleImage) -> Result<usize, GamedataError> {
        let entry = self.get(name)?;
        let address = hooks::resolve(name, &entry.signature()?, image)?;

        if !entry.rip_relative {
            return Ok(address);
        }

        if !image.contains(address) || !image.contains(address + 3) {
            return Err(HookError::InvalidAddress(address).into());
        }

        // SAFETY: the four displacement bytes lie in the image's code
        let displacement = unsafe { std::ptr::read_unaligned(address as *const i32) };
        let target = (address as isize + 4 + displacement as isize) as usize;
        tracing::debug!("'{}' displacement at {:x} points to {:x}", name, address, target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::CodeRange;

    fn image_over(bytes: &[u8]) -> ModuleImage {
        let start = bytes.as_ptr() as usize;
        unsafe {
            ModuleImage::from_ranges(
                "host.exe",
                start,
                vec![CodeRange {
                    start,
                    len: bytes.len(),
                }],
            )
        }
    }

    #[test]
    fn test_builtin_has_script_loader() {
        let gd = Gamedata::builtin();
        let entry = gd.get("ScriptManager_Load").unwrap();
        assert_eq!(entry.pattern, "49 3B DF 76 29");
        assert_eq!(entry.offset, -0x6E);
    }

    #[test]
    fn test_load_overrides_and_extends() {
        let json = r#"{
            "ScriptManager_Load": { "pattern": "49 3B DF 76 2A", "offset": -100 },
            "ScriptState": {
                "pattern": "48 8B 0D ? ? ? ?",
                "offset": 3,
                "module": "Hades2",
                "rip_relative": true
            }
        }"#;

        let gd = Gamedata::load_from_str(json).unwrap();
        assert_eq!(gd.len(), 2);
        assert_eq!(gd.get("ScriptManager_Load").unwrap().offset, -100);

        let state = gd.get("ScriptState").unwrap();
        assert_eq!(state.module.as_deref(), Some("Hades2"));
        assert!(state.rip_relative);
        assert!(!state.allow_ambiguous);
    }

    #[test]
    fn test_missing_entry() {
        let gd = Gamedata::builtin();
        assert!(matches!(
            gd.get("nope"),
            Err(GamedataError::SignatureNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_load_or_builtin_without_file() {
        let path = std::env::temp_dir().join("scripthook-no-such-gamedata.json");
        let gd = Gamedata::load_or_builtin(&path).unwrap();
        assert!(gd.contains("ScriptManager_Load"));
    }

    #[test]
    fn test_resolve_in_applies_offset() {
        let code = [0xCC, 0xCC, 0x49, 0x3B, 0xDF, 0x76, 0x29, 0xC3];
        let image = image_over(&code);
        let gd = Gamedata::load_from_str(
            r#"{ "ScriptManager_Load": { "pattern": "49 3B DF 76 29", "offset": -2 } }"#,
        )
        .unwrap();

        let address = gd.resolve_in("ScriptManager_Load", &image).unwrap();
        assert_eq!(address, code.as_ptr() as usize);
    }

    #[test]
    fn test_resolve_in_follows_rip_relative() {
        // mov rcx, [rip+0x10]
        let code = [0x48, 0x8B, 0x0D, 0x10, 0x00, 0x00, 0x00, 0xC3];
        let image = image_over(&code);
        let gd = Gamedata::load_from_str(
            r#"{ "ScriptState": { "pattern": "48 8B 0D ? ? ? ?", "offset": 3, "rip_relative": true } }"#,
        )
        .unwrap();

        let address = gd.resolve_in("ScriptState", &image).unwrap();
        assert_eq!(address, code.as_ptr() as usize + 7 + 0x10);
    }

    #[test]
    fn test_bad_pattern_is_reported() {
        let gd = Gamedata::load_from_str(r#"{ "Broken": { "pattern": "ZZ" } }"#).unwrap();
        let image = image_over(&[0u8; 4]);
        assert!(matches!(
            gd.resolve_in("Broken", &image),
            Err(GamedataError::Hook(HookError::InvalidSignature(_)))
        ));
    }
}
