//! SIMD-accelerated XOR kernel for the FEC hot path.
//!
//! A dispatch layer selects the best available implementation once, at
//! first use, based on runtime CPU feature detection. Every implementation
//! here must be bit-exact with the scalar reference for every input size,
//! including tails that don't divide evenly into the vector width.

use std::sync::OnceLock;

/// XORs `inputs` (k equal-length byte slices) into `out`, which must be at
/// least as long as each input.
pub type XorKernel = fn(inputs: &[&[u8]], out: &mut [u8]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Avx512,
    Avx2,
    Sse2,
    Neon,
    Scalar,
}

fn detect() -> Kernel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx512f") {
            return Kernel::Avx512;
        }
        if is_x86_feature_detected!("avx2") {
            return Kernel::Avx2;
        }
        if is_x86_feature_detected!("sse2") {
            return Kernel::Sse2;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        if std::arch::is_aarch64_feature_detected!("neon") {
            return Kernel::Neon;
        }
    }
    Kernel::Scalar
}

fn kernel_fn(kernel: Kernel) -> XorKernel {
    match kernel {
        Kernel::Avx512 => avx512_xor,
        Kernel::Avx2 => avx2_xor,
        Kernel::Sse2 => sse2_xor,
        Kernel::Neon => neon_xor,
        Kernel::Scalar => scalar_xor,
    }
}

static SELECTED: OnceLock<Kernel> = OnceLock::new();

/// Returns the kernel selected for this process. Selection happens once;
/// the returned function pointer is constant thereafter.
pub fn selected_kernel() -> Kernel {
    *SELECTED.get_or_init(detect)
}

/// XORs `inputs` into `out` using the best kernel available on this CPU.
pub fn xor_dispatch(inputs: &[&[u8]], out: &mut [u8]) {
    kernel_fn(selected_kernel())(inputs, out)
}

/// Scalar reference implementation. All other kernels must match this
/// byte-for-byte.
pub fn scalar_xor(inputs: &[&[u8]], out: &mut [u8]) {
    let len = out.len();
    for b in out.iter_mut() {
        *b = 0;
    }
    for input in inputs {
        debug_assert!(input.len() >= len);
        for i in 0..len {
            out[i] ^= input[i];
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn sse2_xor(inputs: &[&[u8]], out: &mut [u8]) {
    use std::arch::x86_64::*;
    let len = out.len();
    const WIDTH: usize = 16;
    let chunks = len / WIDTH;
    unsafe {
        for c in 0..chunks {
            let off = c * WIDTH;
            let mut acc = _mm_setzero_si128();
            for input in inputs {
                let v = _mm_loadu_si128(input.as_ptr().add(off) as *const __m128i);
                acc = _mm_xor_si128(acc, v);
            }
            _mm_storeu_si128(out.as_mut_ptr().add(off) as *mut __m128i, acc);
        }
    }
    scalar_xor_tail(inputs, out, chunks * WIDTH);
}

#[cfg(not(target_arch = "x86_64"))]
fn sse2_xor(inputs: &[&[u8]], out: &mut [u8]) {
    scalar_xor(inputs, out)
}

#[cfg(target_arch = "x86_64")]
fn avx2_xor(inputs: &[&[u8]], out: &mut [u8]) {
    use std::arch::x86_64::*;
    let len = out.len();
    const WIDTH: usize = 32;
    let chunks = len / WIDTH;
    unsafe {
        for c in 0..chunks {
            let off = c * WIDTH;
            let mut acc = _mm256_setzero_si256();
            for input in inputs {
                let v = _mm256_loadu_si256(input.as_ptr().add(off) as *const __m256i);
                acc = _mm256_xor_si256(acc, v);
            }
            _mm256_storeu_si256(out.as_mut_ptr().add(off) as *mut __m256i, acc);
        }
    }
    scalar_xor_tail(inputs, out, chunks * WIDTH);
}

#[cfg(not(target_arch = "x86_64"))]
fn avx2_xor(inputs: &[&[u8]], out: &mut [u8]) {
    scalar_xor(inputs, out)
}

#[cfg(target_arch = "x86_64")]
fn avx512_xor(inputs: &[&[u8]], out: &mut [u8]) {
    use std::arch::x86_64::*;
    let len = out.len();
    const WIDTH: usize = 64;
    let chunks = len / WIDTH;
    unsafe {
        for c in 0..chunks {
            let off = c * WIDTH;
            let mut acc = _mm512_setzero_si512();
            for input in inputs {
                let v = _mm512_loadu_si512(input.as_ptr().add(off) as *const _);
                acc = _mm512_xor_si512(acc, v);
            }
            if len >= 4096 {
                // Large symbols (>= 4 KiB) use a non-temporal store to avoid
                // polluting the cache with repair data that is written once
                // and read rarely.
                _mm512_stream_si512(out.as_mut_ptr().add(off) as *mut _, acc);
            } else {
                _mm512_storeu_si512(out.as_mut_ptr().add(off) as *mut _, acc);
            }
        }
    }
    scalar_xor_tail(inputs, out, chunks * WIDTH);
}

#[cfg(not(target_arch = "x86_64"))]
fn avx512_xor(inputs: &[&[u8]], out: &mut [u8]) {
    scalar_xor(inputs, out)
}

#[cfg(target_arch = "aarch64")]
fn neon_xor(inputs: &[&[u8]], out: &mut [u8]) {
    use std::arch::aarch64::*;
    let len = out.len();
    const WIDTH: usize = 16;
    let chunks = len / WIDTH;
    unsafe {
        for c in 0..chunks {
            let off = c * WIDTH;
            let mut acc = vdupq_n_u8(0);
            for input in inputs {
                let v = vld1q_u8(input.as_ptr().add(off));
                acc = veorq_u8(acc, v);
            }
            vst1q_u8(out.as_mut_ptr().add(off), acc);
        }
    }
    scalar_xor_tail(inputs, out, chunks * WIDTH);
}

#[cfg(not(target_arch = "aarch64"))]
fn neon_xor(inputs: &[&[u8]], out: &mut [u8]) {
    scalar_xor(inputs, out)
}

/// Finishes the bytes a vectorized kernel couldn't cover because the
/// symbol length isn't a multiple of the vector width.
fn scalar_xor_tail(inputs: &[&[u8]], out: &mut [u8], from: usize) {
    for b in out[from..].iter_mut() {
        *b = 0;
    }
    for input in inputs {
        for i in from..out.len() {
            out[i] ^= input[i];
        }
    }
}

/// Batch entry point: computes the XOR repair symbol for several groups in
/// one call, amortizing dispatch overhead. Encoding is embarrassingly
/// parallel across groups, so this uses `rayon` to encode them
/// concurrently.
pub fn xor_batch<'a>(groups: &[&[&'a [u8]]], symbol_len: usize) -> Vec<Vec<u8>> {
    use rayon::prelude::*;
    groups
        .par_iter()
        .map(|inputs| {
            let mut out = vec![0u8; symbol_len];
            xor_dispatch(inputs, &mut out);
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kernels() -> Vec<(&'static str, XorKernel)> {
        vec![
            ("scalar", scalar_xor as XorKernel),
            ("sse2", sse2_xor as XorKernel),
            ("avx2", avx2_xor as XorKernel),
            ("avx512", avx512_xor as XorKernel),
            ("neon", neon_xor as XorKernel),
        ]
    }

    #[test]
    fn all_kernels_match_scalar_reference_for_every_size() {
        for &size in &[1, 15, 16, 17, 31, 32, 33, 63, 64, 65, 1200, 1201, 1234, 1500, 4096, 9000] {
            let k = 5;
            let mut rng_state: u64 = size as u64 + 1;
            let mut next = || {
                rng_state ^= rng_state << 13;
                rng_state ^= rng_state >> 7;
                rng_state ^= rng_state << 17;
                rng_state
            };
            let inputs: Vec<Vec<u8>> = (0..k)
                .map(|_| (0..size).map(|_| (next() & 0xff) as u8).collect())
                .collect();
            let refs: Vec<&[u8]> = inputs.iter().map(|v| v.as_slice()).collect();

            let mut expected = vec![0u8; size];
            scalar_xor(&refs, &mut expected);

            for (name, kernel) in all_kernels() {
                let mut out = vec![0u8; size];
                kernel(&refs, &mut out);
                assert_eq!(out, expected, "kernel {name} mismatched at size {size}");
            }
        }
    }

    #[test]
    fn dispatch_selects_a_kernel_and_is_stable() {
        let first = selected_kernel();
        let second = selected_kernel();
        assert_eq!(first, second);
    }

    #[test]
    fn xor_batch_matches_per_group_dispatch() {
        let a = vec![0xAAu8; 64];
        let b = vec![0x55u8; 64];
        let inputs: Vec<&[u8]> = vec![&a, &b];
        let groups = vec![inputs.as_slice(), inputs.as_slice()];
        let out = xor_batch(&groups, 64);
        let mut expected = vec![0u8; 64];
        xor_dispatch(&inputs, &mut expected);
        assert_eq!(out[0], expected);
        assert_eq!(out[1], expected);
    }
}
