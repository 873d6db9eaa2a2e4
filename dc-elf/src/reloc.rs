//! Self-Relocation
//!
//! A position-independent image loaded away from its link address fixes up
//! its own absolute pointers before anything reads global data. Only
//! base-relative relocations are applied: the word at `load_base + r_offset`
//! gets `load_base` added to it.
//!
//! [`relocate`] runs before the image's globals are valid, so it touches no
//! statics, does not log and cannot panic. Unsupported kinds leave their
//! target alone and are reported in the returned [`RelocReport`] so the stage
//! can refuse to continue once it is able to say why.

/// No-op relocation kind, on every machine.
pub const R_NONE: u32 = 0;
/// `R_X86_64_RELATIVE`
pub const R_X86_64_RELATIVE: u32 = 8;
/// `R_AARCH64_RELATIVE`
pub const R_AARCH64_RELATIVE: u32 = 1027;

/// `DT_NULL`
pub const DT_NULL: i64 = 0;
/// `DT_RELA`
pub const DT_RELA: i64 = 7;
/// `DT_RELASZ`
pub const DT_RELASZ: i64 = 8;
/// `DT_RELAENT`
pub const DT_RELAENT: i64 = 9;

/// Machine whose relocation numbering applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    X86_64,
    AArch64,
}

impl Machine {
    #[cfg(target_arch = "aarch64")]
    pub const NATIVE: Self = Self::AArch64;
    #[cfg(not(target_arch = "aarch64"))]
    pub const NATIVE: Self = Self::X86_64;

    /// Base-relative relocation kind for this machine.
    #[must_use]
    pub const fn relative_kind(self) -> u32 {
        match self {
            Self::X86_64 => R_X86_64_RELATIVE,
            Self::AArch64 => R_AARCH64_RELATIVE,
        }
    }
}

/// `Elf64_Rela`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rela {
    pub r_offset: u64,
    pub r_info: u64,
    pub r_addend: i64,
}

impl Rela {
    #[must_use]
    pub const fn new(r_offset: u64, kind: u32) -> Self {
        Self {
            r_offset,
            r_info: kind as u64,
            r_addend: 0,
        }
    }

    /// Relocation kind (low half of `r_info`).
    #[must_use]
    pub const fn kind(&self) -> u32 {
        self.r_info as u32
    }

    /// Symbol index (high half of `r_info`).
    #[must_use]
    pub const fn symbol(&self) -> u32 {
        (self.r_info >> 32) as u32
    }
}

/// `Elf64_Dyn`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dyn {
    pub d_tag: i64,
    pub d_val: u64,
}

/// Location of the relocation table described by a dynamic section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaTable {
    /// Offset of the table from the load base
    pub offset: u64,
    /// Size of the table in bytes
    pub size: u64,
}

impl RelaTable {
    /// Number of [`Rela`] records in the table.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.size as usize / core::mem::size_of::<Rela>()
    }
}

/// Find the `DT_RELA` table in a dynamic section.
///
/// Returns `None` when the section names no table, or when its entry size is
/// not that of [`Rela`].
#[must_use]
pub fn find_rela_table(dynamic: &[Dyn]) -> Option<RelaTable> {
    let mut offset = None;
    let mut size = None;
    let mut entry_size = core::mem::size_of::<Rela>() as u64;

    for entry in dynamic {
        match entry.d_tag {
            DT_NULL => break,
            DT_RELA => offset = Some(entry.d_val),
            DT_RELASZ => size = Some(entry.d_val),
            DT_RELAENT => entry_size = entry.d_val,
            _ => {}
        }
    }

    if entry_size != core::mem::size_of::<Rela>() as u64 {
        return None;
    }
    Some(RelaTable {
        offset: offset?,
        size: size.unwrap_or(0),
    })
}

/// Outcome of a relocation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelocReport {
    /// Base-relative fixups applied
    pub applied: usize,
    /// Entries left alone (`R_NONE` and unsupported kinds)
    pub skipped: usize,
    /// First unsupported kind seen, if any
    pub first_unhandled: Option<u32>,
}

impl RelocReport {
    /// Every entry was either applied or a no-op.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.first_unhandled.is_none()
    }
}

/// Apply base-relative relocations for an image loaded at `load_base`.
///
/// # Safety
/// For every base-relative entry, `load_base + r_offset` must be a writable,
/// word-aligned address inside the image.
#[inline(never)]
pub unsafe fn relocate(load_base: usize, entries: &[Rela], machine: Machine) -> RelocReport {
    let relative = machine.relative_kind();
    let mut report = RelocReport {
        applied: 0,
        skipped: 0,
        first_unhandled: None,
    };

    for rela in entries {
        let kind = rela.kind();
        if kind == relative {
            let target = load_base.wrapping_add(rela.r_offset as usize) as *mut usize;
            // SAFETY: Caller guarantees the target word lies inside the image
            unsafe {
                target.write(target.read().wrapping_add(load_base));
            }
            report.applied = report.applied.wrapping_add(1);
        } else {
            report.skipped = report.skipped.wrapping_add(1);
            if kind != R_NONE && report.first_unhandled.is_none() {
                report.first_unhandled = Some(kind);
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec;

    #[test]
    fn test_relative_adds_load_base() {
        let mut image = vec![0usize; 4];
        image[1] = 0x40;
        let base = image.as_mut_ptr() as usize;

        let entries = [Rela::new(8, Machine::NATIVE.relative_kind())];
        // SAFETY: offset 8 is the second word of the test image
        let report = unsafe { relocate(base, &entries, Machine::NATIVE) };

        assert_eq!(image[1], 0x40 + base);
        assert_eq!(image[0], 0);
        assert_eq!(report.applied, 1);
        assert!(report.is_complete());
    }

    #[test]
    fn test_unsupported_kind_leaves_target() {
        let mut image = vec![0x1234usize; 2];
        let base = image.as_mut_ptr() as usize;

        // R_X86_64_64 needs a symbol table, which is never resolved here
        let entries = [
            Rela::new(0, R_NONE),
            Rela::new(8, 1),
            Rela::new(0, 6),
        ];
        // SAFETY: no entry is base-relative, so nothing is written
        let report = unsafe { relocate(base, &entries, Machine::X86_64) };

        assert_eq!(image, vec![0x1234usize; 2]);
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.first_unhandled, Some(1));
    }

    #[test]
    fn test_relative_kind_depends_on_machine() {
        let mut image = vec![0usize; 1];
        let base = image.as_mut_ptr() as usize;
        let entries = [Rela::new(0, R_X86_64_RELATIVE)];

        // SAFETY: the x86 kind is not base-relative on AArch64, nothing is written
        let report = unsafe { relocate(base, &entries, Machine::AArch64) };
        assert_eq!(image[0], 0);
        assert_eq!(report.first_unhandled, Some(R_X86_64_RELATIVE));
    }

    #[test]
    fn test_find_rela_table() {
        let dynamic = [
            Dyn { d_tag: 0x6fff_fffb, d_val: 0 },
            Dyn { d_tag: DT_RELA, d_val: 0x2000 },
            Dyn { d_tag: DT_RELASZ, d_val: 48 },
            Dyn { d_tag: DT_RELAENT, d_val: 24 },
            Dyn { d_tag: DT_NULL, d_val: 0 },
            Dyn { d_tag: DT_RELA, d_val: 0x9999 },
        ];
        let table = find_rela_table(&dynamic).unwrap();
        assert_eq!(table, RelaTable { offset: 0x2000, size: 48 });
        assert_eq!(table.count(), 2);

        assert_eq!(find_rela_table(&[Dyn { d_tag: DT_NULL, d_val: 0 }]), None);
        assert_eq!(
            find_rela_table(&[
                Dyn { d_tag: DT_RELA, d_val: 0x2000 },
                Dyn { d_tag: DT_RELAENT, d_val: 16 },
            ]),
            None
        );
    }
}
