use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::cpu::CPU_FEATURES;

/// Capability switches for cache, dataset and VM creation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u32);

impl Flags {
    pub const DEFAULT: Flags = Flags(0);
    pub const LARGE_PAGES: Flags = Flags(1);
    pub const HARD_AES: Flags = Flags(2);
    pub const FULL_MEM: Flags = Flags(4);
    pub const JIT: Flags = Flags(8);
    pub const ONE_GB_PAGES: Flags = Flags(16);
    pub const AMD: Flags = Flags(64);

    const NAMES: [(Flags, &'static str); 7] = [
        (Flags::LARGE_PAGES, "LARGE_PAGES"),
        (Flags::HARD_AES, "HARD_AES"),
        (Flags::FULL_MEM, "FULL_MEM"),
        (Flags::JIT, "JIT"),
        (Flags::ONE_GB_PAGES, "ONE_GB_PAGES"),
        (Flags::AMD, "AMD"),
        (Flags::DEFAULT, "DEFAULT"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Flags {
        Flags(bits)
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    /// Flags supported by the current host: hardware AES, the code
    /// generator where one exists, and the AMD variant of CFROUND.
    pub fn recommended() -> Flags {
        let mut flags = Flags::DEFAULT;
        if CPU_FEATURES.aes {
            flags |= Flags::HARD_AES;
        }
        if cfg!(all(target_arch = "x86_64", unix)) {
            flags |= Flags::JIT;
        }
        if CPU_FEATURES.amd {
            flags |= Flags::AMD;
        }
        flags
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "DEFAULT");
        }
        let mut first = true;
        for &(flag, name) in Flags::NAMES.iter() {
            if flag.0 != 0 && self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine() {
        let f = Flags::FULL_MEM | Flags::JIT;
        assert!(f.contains(Flags::JIT));
        assert!(f.contains(Flags::FULL_MEM));
        assert!(!f.contains(Flags::LARGE_PAGES));
        assert_eq!(f.bits(), 12);
        assert_eq!(format!("{:?}", f), "FULL_MEM | JIT");
        assert_eq!(format!("{:?}", Flags::DEFAULT), "DEFAULT");
    }

    #[test]
    fn test_remove() {
        let mut f = Flags::from_bits(0x5F);
        f.remove(Flags::JIT);
        assert!(!f.contains(Flags::JIT));
        assert!(f.contains(Flags::ONE_GB_PAGES));
    }

    #[test]
    fn test_recommended_never_requests_memory() {
        let f = Flags::recommended();
        assert!(!f.contains(Flags::FULL_MEM));
        assert!(!f.contains(Flags::LARGE_PAGES));
    }
}
