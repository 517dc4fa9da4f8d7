//! One-time probe of the host CPU.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub aes: bool,
    pub ssse3: bool,
    pub avx: bool,
    pub avx2: bool,
    pub bmi2: bool,
    pub xop: bool,
    pub amd: bool,
    /// Intel cores affected by the jump conditional code erratum, where a
    /// branch crossing or ending on a 32-byte boundary is slow.
    pub jcc_erratum: bool,
}

lazy_static! {
    pub static ref CPU_FEATURES: CpuFeatures = CpuFeatures::detect();
}

impl CpuFeatures {
    #[cfg(target_arch = "x86_64")]
    fn detect() -> CpuFeatures {
        use std::arch::x86_64::__cpuid;

        let vendor = unsafe { __cpuid(0) };
        let amd = vendor.ebx == 0x6874_7541 && vendor.edx == 0x6974_6e65 && vendor.ecx == 0x444d_4163;
        let intel = vendor.ebx == 0x756e_6547 && vendor.edx == 0x4965_6e69 && vendor.ecx == 0x6c65_746e;

        let jcc_erratum = if intel && vendor.eax >= 1 {
            let info = unsafe { __cpuid(1) };
            let family = (info.eax >> 8) & 0xF;
            let model = ((info.eax >> 4) & 0xF) | ((info.eax >> 12) & 0xF0);
            family == 6
                && match model {
                    0x4E | 0x55 | 0x5E | 0x8E | 0x9E | 0xA5 | 0xA6 => true,
                    _ => false,
                }
        } else {
            false
        };

        let features = CpuFeatures {
            aes: is_x86_feature_detected!("aes"),
            ssse3: is_x86_feature_detected!("ssse3"),
            avx: is_x86_feature_detected!("avx"),
            avx2: is_x86_feature_detected!("avx2"),
            bmi2: is_x86_feature_detected!("bmi2"),
            xop: amd && xop_supported(),
            amd,
            jcc_erratum,
        };
        debug!("cpu features: {:?}", features);
        features
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn detect() -> CpuFeatures {
        CpuFeatures::default()
    }
}

#[cfg(target_arch = "x86_64")]
fn xop_supported() -> bool {
    use std::arch::x86_64::__cpuid;
    let max_ext = unsafe { __cpuid(0x8000_0000) }.eax;
    if max_ext < 0x8000_0001 {
        return false;
    }
    unsafe { __cpuid(0x8000_0001) }.ecx & (1 << 11) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn test_probe_matches_std_detection() {
        let f = *CPU_FEATURES;
        assert_eq!(f.aes, is_x86_feature_detected!("aes"));
        assert_eq!(f.bmi2, is_x86_feature_detected!("bmi2"));
        assert!(!(f.amd && f.jcc_erratum));
    }
}
