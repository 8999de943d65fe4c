/*!
 * Compiler and CPU Hints
 * Branch prediction hints and spin-loop helpers for the wait/wake hot paths
 */

/// Hint that the branch is expected to be taken
///
/// On nightly (`nightly` feature) this lowers to `llvm.expect`; on stable it
/// is the identity, still documenting which side of a check is hot.
#[inline(always)]
#[must_use]
pub fn likely(b: bool) -> bool {
    #[cfg(feature = "nightly")]
    {
        ::core::intrinsics::likely(b)
    }
    #[cfg(not(feature = "nightly"))]
    {
        b
    }
}

/// Hint that the branch is expected not to be taken
#[inline(always)]
#[must_use]
pub fn unlikely(b: bool) -> bool {
    #[cfg(feature = "nightly")]
    {
        ::core::intrinsics::unlikely(b)
    }
    #[cfg(not(feature = "nightly"))]
    {
        b
    }
}

/// Issue `count` CPU pause instructions
#[inline(always)]
pub fn cpu_relax(count: u32) {
    for _ in 0..count {
        std::hint::spin_loop();
    }
}
