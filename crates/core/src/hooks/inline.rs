//! Inline function detours
//!
//! Overwrites the prologue of a function with a jump to a replacement and
//! relocates the overwritten instructions into a trampoline, which then acts
//! as the "original" function. Built on iced-x86 so it works on stable Rust.
//!
//! All decoding, encoding and allocation happens in [`InlineDetour::new`].
//! Enabling and disabling only copy prepared bytes, which keeps them safe to
//! call while other threads are suspended.

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Code, Decoder, DecoderOptions, FlowControl, Instruction,
    InstructionBlock,
};

use super::detour::{Detour, DetourFactory};
use super::error::HookError;
use super::patch::{PatchOutcome, PatchSite};
use super::trampoline::{alloc_trampoline, TRAMPOLINE_SIZE};

/// `jmp rel32`
const REL_JUMP_LEN: usize = 5;

/// `jmp qword ptr [rip+0]` followed by the absolute target
const ABS_JUMP_LEN: usize = 14;

/// Bytes read from the target when decoding its prologue
const MAX_PROLOGUE: usize = 32;

const NOP: u8 = 0x90;

/// Jump bytes from `from` to `to`, choosing the short form when in reach
fn encode_jump(from: usize, to: usize) -> Vec<u8> {
    let rel = (to as i64).wrapping_sub(from as i64 + REL_JUMP_LEN as i64);
    match i32::try_from(rel) {
        Ok(rel) => {
            let mut bytes = Vec::with_capacity(REL_JUMP_LEN);
            bytes.push(0xE9);
            bytes.extend_from_slice(&rel.to_le_bytes());
            bytes
        }
        Err(_) => {
            let mut bytes = Vec::with_capacity(ABS_JUMP_LEN);
            bytes.extend_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
            bytes.extend_from_slice(&(to as u64).to_le_bytes());
            bytes
        }
    }
}

/// Decode whole instructions from `target` until at least `needed` bytes are covered
fn steal_prologue(name: &str, target: usize, needed: usize) -> Result<Vec<Instruction>, HookError> {
    // SAFETY: caller guarantees target is the start of a mapped function
    let code = unsafe { std::slice::from_raw_parts(target as *const u8, MAX_PROLOGUE) };
    let mut decoder = Decoder::with_ip(64, code, target as u64, DecoderOptions::NONE);

    let mut stolen = Vec::new();
    let mut covered = 0;

    while covered < needed {
        if !decoder.can_decode() {
            return Err(HookError::RelocationFailed(format!(
                "'{}': prologue longer than {} bytes",
                name, MAX_PROLOGUE
            )));
        }

        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(HookError::RelocationFailed(format!(
                "'{}': invalid instruction at {:x}",
                name,
                instruction.ip()
            )));
        }

        covered += instruction.len();

        // A return or jump before the patch is covered means the function is too short
        let ends_flow = matches!(
            instruction.flow_control(),
            FlowControl::Return | FlowControl::UnconditionalBranch | FlowControl::IndirectBranch
        );
        stolen.push(instruction);
        if ends_flow && covered < needed {
            return Err(HookError::RelocationFailed(format!(
                "'{}': function ends after {} bytes",
                name, covered
            )));
        }
    }

    Ok(stolen)
}

/// A prepared inline detour on one function
pub struct InlineDetour {
    name: String,
    site: PatchSite,
    trampoline: usize,
    original_bytes: Vec<u8>,
    patch_bytes: Vec<u8>,
    enabled: bool,
    protection_fault: bool,
}

// SAFETY: the detour only holds addresses; mutation goes through &mut self
unsafe impl Send for InlineDetour {}

impl InlineDetour {
    /// Prepare a detour from `target` to `replacement`
    ///
    /// Nothing is written to `target` until [`Detour::enable`].
    ///
    /// # Safety
    /// `target` must be the entry of a mapped x86-64 function and
    /// `replacement` a function with a compatible signature.
    pub unsafe fn new(name: &str, target: usize, replacement: usize) -> Result<Self, HookError> {
        if target == 0 {
            return Err(HookError::InvalidAddress(target));
        }
        if replacement == 0 {
            return Err(HookError::InvalidAddress(replacement));
        }

        let jump = encode_jump(target, replacement);
        let stolen = steal_prologue(name, target, jump.len())?;
        let stolen_len: usize = stolen.iter().map(Instruction::len).sum();

        let trampoline = alloc_trampoline(target).ok_or_else(|| HookError::DetourCreation {
            name: name.to_string(),
            reason: "no trampoline memory".to_string(),
        })?;
        let trampoline = trampoline.as_ptr() as usize;

        let mut block = stolen;
        let resume = Instruction::with_branch(Code::Jmp_rel32_64, (target + stolen_len) as u64)
            .map_err(|err| HookError::RelocationFailed(err.to_string()))?;
        block.push(resume);

        let encoded = BlockEncoder::encode(
            64,
            InstructionBlock::new(&block, trampoline as u64),
            BlockEncoderOptions::NONE,
        )
        .map_err(|err| HookError::RelocationFailed(format!("'{}': {}", name, err)))?;

        if encoded.code_buffer.len() > TRAMPOLINE_SIZE {
            return Err(HookError::RelocationFailed(format!(
                "'{}': relocated prologue needs {} bytes",
                name,
                encoded.code_buffer.len()
            )));
        }

        std::ptr::copy_nonoverlapping(
            encoded.code_buffer.as_ptr(),
            trampoline as *mut u8,
            encoded.code_buffer.len(),
        );

        let site = PatchSite::query(target, stolen_len)?;
        let original_bytes = site.read();

        let mut patch_bytes = jump;
        patch_bytes.resize(stolen_len, NOP);

        tracing::debug!(
            "Prepared detour '{}': {:x} -> {:x}, trampoline {:x}, {} bytes stolen",
            name,
            target,
            replacement,
            trampoline,
            stolen_len
        );

        Ok(Self {
            name: name.to_string(),
            site,
            trampoline,
            original_bytes,
            patch_bytes,
            enabled: false,
            protection_fault: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> usize {
        self.site.address()
    }

    fn note(&mut self, outcome: PatchOutcome) {
        if outcome == PatchOutcome::ProtectionLeft {
            self.protection_fault = true;
        }
    }
}

impl Detour for InlineDetour {
    fn enable(&mut self) -> Result<(), HookError> {
        if self.enabled {
            return Ok(());
        }
        let outcome = unsafe { self.site.write(&self.patch_bytes)? };
        self.note(outcome);
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), HookError> {
        if !self.enabled {
            return Ok(());
        }
        let outcome = unsafe { self.site.write(&self.original_bytes)? };
        self.note(outcome);
        self.enabled = false;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn original(&self) -> usize {
        self.trampoline
    }

    fn take_protection_fault(&mut self) -> Option<usize> {
        std::mem::take(&mut self.protection_fault).then(|| self.site.address())
    }
}

/// Creates [`InlineDetour`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDetourFactory;

impl DetourFactory for InlineDetourFactory {
    unsafe fn create(
        &self,
        name: &str,
        target: usize,
        replacement: usize,
    ) -> Result<Box<dyn Detour>, HookError> {
        Ok(Box::new(InlineDetour::new(name, target, replacement)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_encoding() {
        let near = encode_jump(0x1000, 0x2000);
        assert_eq!(near.len(), REL_JUMP_LEN);
        assert_eq!(near[0], 0xE9);
        assert_eq!(i32::from_le_bytes(near[1..5].try_into().unwrap()), 0x2000 - 0x1005);

        let far = encode_jump(0x1000, 0x7FFF_0000_0000);
        assert_eq!(far.len(), ABS_JUMP_LEN);
        assert_eq!(&far[..6], &[0xFF, 0x25, 0, 0, 0, 0]);
        assert_eq!(u64::from_le_bytes(far[6..].try_into().unwrap()), 0x7FFF_0000_0000);
    }

    #[test]
    fn test_steal_prologue_covers_whole_instructions() {
        // push rbp; mov rbp, rsp; sub rsp, 0x20; ...
        let code: [u8; MAX_PROLOGUE] = {
            let mut buf = [0xCC; MAX_PROLOGUE];
            buf[..8].copy_from_slice(&[0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x20]);
            buf
        };
        let stolen = steal_prologue("test", code.as_ptr() as usize, REL_JUMP_LEN).unwrap();
        let len: usize = stolen.iter().map(Instruction::len).sum();
        assert_eq!(stolen.len(), 3);
        assert_eq!(len, 8);
    }

    #[test]
    fn test_steal_prologue_rejects_short_function() {
        // xor eax, eax; ret
        let code: [u8; MAX_PROLOGUE] = {
            let mut buf = [0xCC; MAX_PROLOGUE];
            buf[..3].copy_from_slice(&[0x31, 0xC0, 0xC3]);
            buf
        };
        assert!(steal_prologue("short", code.as_ptr() as usize, REL_JUMP_LEN).is_err());
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    mod live {
        use super::super::*;

        #[inline(never)]
        extern "C" fn compute(x: u64) -> u64 {
            let mut acc = std::hint::black_box(x);
            for i in 0..std::hint::black_box(4u64) {
                acc = acc.wrapping_mul(3).wrapping_add(i);
            }
            acc
        }

        extern "C" fn compute_replacement(x: u64) -> u64 {
            x + 1_000_000
        }

        #[test]
        fn test_detour_redirects_and_restores() {
            let target = compute as usize;
            let expected = compute(7);

            let mut detour =
                unsafe { InlineDetour::new("compute", target, compute_replacement as usize) }
                    .unwrap();
            assert!(!detour.is_enabled());

            detour.enable().unwrap();
            assert_eq!(std::hint::black_box(compute as extern "C" fn(u64) -> u64)(7), 1_000_007);

            let original: extern "C" fn(u64) -> u64 =
                unsafe { std::mem::transmute(detour.original()) };
            assert_eq!(original(7), expected);

            detour.disable().unwrap();
            assert_eq!(std::hint::black_box(compute as extern "C" fn(u64) -> u64)(7), expected);
            assert_eq!(detour.take_protection_fault(), None);
        }
    }
}
