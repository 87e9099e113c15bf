//! Random label generation and small bounded-random helpers.

use rand_core::RngCore;

/// Random file/dir label: 1..=max_len uppercase ASCII letters.
pub fn gen_filename(rng: &mut impl RngCore, max_len: usize) -> String {
    let n = rand_index(rng, max_len) + 1;
    let mut out = String::with_capacity(n);
    for _ in 0..n {
        out.push((b'A' + (rng.next_u32() % 26) as u8) as char);
    }
    out
}

/// Uniform-ish index in 0..len. len must be non-zero.
pub fn rand_index(rng: &mut impl RngCore, len: usize) -> usize {
    (rng.next_u64() % len as u64) as usize
}

pub fn rand_below(rng: &mut impl RngCore, n: u64) -> u64 {
    rng.next_u64() % n
}

/// True with probability 1/n.
pub fn one_in(rng: &mut impl RngCore, n: u64) -> bool {
    rand_below(rng, n) == 0
}
