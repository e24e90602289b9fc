//! FFT-compatible array sizes
//!
//! A size is FFT-compatible when its largest prime factor is at most
//! [MAX_PRIME] and it is divisible by [REQUIRED_DIVIDER].

/// Largest prime factor allowed in an FFT-compatible size
pub const MAX_PRIME: usize = 7;
/// Divider required in an FFT-compatible size
pub const REQUIRED_DIVIDER: usize = 2;

fn largest_prime_factor(mut n: usize) -> usize {
    let mut largest = 1;
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            largest = p;
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        largest = largest.max(n);
    }
    largest
}

/// Checks if `n` meets the FFT requirements
pub fn is_fft_compatible(n: usize) -> bool {
    n > 0 && n % REQUIRED_DIVIDER == 0 && largest_prime_factor(n) <= MAX_PRIME
}

/// Returns the largest FFT-compatible size lower or equal to `n`
pub fn smaller_fft_size(n: usize) -> Option<usize> {
    (REQUIRED_DIVIDER..=n).rev().find(|&k| is_fft_compatible(k))
}

/// Returns the smallest FFT-compatible size greater or equal to `n`
pub fn higher_fft_size(n: usize) -> usize {
    (n.max(REQUIRED_DIVIDER)..)
        .find(|&k| is_fft_compatible(k))
        .unwrap_or(n)
}
