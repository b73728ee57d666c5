//! Payload pattern checks and timing arithmetic.

use quanta::Instant;

/// One period of the expected pattern.
const PATTERN: [u8; 256] = {
    let mut p = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        p[i] = i as u8;
        i += 1;
    }
    p
};

/// At most this many mismatches are kept for reporting; the rest are only
/// counted.
pub const MAX_RECORDED_MISMATCHES: usize = 64;

/// Expected value of byte `i` of a message: `i mod 256`.
#[inline(always)]
pub fn expected_byte(i: usize) -> u8 {
    (i % 256) as u8
}

/// Fill `buf` with the expected pattern.
pub fn fill_pattern(buf: &mut [u8]) {
    for chunk in buf.chunks_mut(PATTERN.len()) {
        let len = chunk.len();
        chunk.copy_from_slice(&PATTERN[..len]);
    }
}

/// A byte that differs from the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub index: usize,
    pub expected: u8,
    pub actual: u8,
}

/// Result of checking a buffer against the pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    len: usize,
    mismatch_count: usize,
    mismatches: Vec<Mismatch>,
}

impl Verification {
    /// Number of bytes checked.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether every byte matched.
    pub fn all_same(&self) -> bool {
        self.mismatch_count == 0
    }

    /// Total number of mismatching bytes.
    pub fn mismatch_count(&self) -> usize {
        self.mismatch_count
    }

    /// The recorded mismatches, in index order.
    pub fn mismatches(&self) -> &[Mismatch] {
        &self.mismatches
    }

    /// The lowest mismatching index, if any.
    pub fn first_mismatch(&self) -> Option<Mismatch> {
        self.mismatches.first().copied()
    }

    /// Number of mismatches counted but not recorded.
    pub fn elided(&self) -> usize {
        self.mismatch_count - self.mismatches.len()
    }
}

/// Check `buf[i] == i mod 256` for every `i`.
pub fn verify(buf: &[u8]) -> Verification {
    let mut mismatch_count = 0;
    let mut mismatches = Vec::new();

    for (n, chunk) in buf.chunks(PATTERN.len()).enumerate() {
        let expected = &PATTERN[..chunk.len()];
        if chunk == expected {
            continue;
        }
        let base = n * PATTERN.len();
        for (off, (&actual, &expected)) in chunk.iter().zip(expected).enumerate() {
            if actual != expected {
                mismatch_count += 1;
                if mismatches.len() < MAX_RECORDED_MISMATCHES {
                    mismatches.push(Mismatch {
                        index: base + off,
                        expected,
                        actual,
                    });
                }
            }
        }
    }

    Verification {
        len: buf.len(),
        mismatch_count,
        mismatches,
    }
}

/// Two timestamps around a transfer.
#[derive(Debug, Clone, Copy)]
pub struct TimingSample {
    start: Instant,
    end: Instant,
}

impl TimingSample {
    pub fn new(start: Instant, end: Instant) -> Self {
        Self { start, end }
    }

    /// Elapsed whole microseconds.
    pub fn elapsed_us(&self) -> u64 {
        self.end.duration_since(self.start).as_micros() as u64
    }
}

/// Throughput in GB/s (1 GB = 1024^3 bytes) of `bytes` moved in
/// `elapsed_us` microseconds. Zero elapsed time gives infinity.
pub fn throughput_gbps(bytes: usize, elapsed_us: u64) -> f64 {
    const GIB: f64 = (1u64 << 30) as f64;
    if elapsed_us == 0 {
        return f64::INFINITY;
    }
    bytes as f64 / (elapsed_us as f64 / 1_000_000.0) / GIB
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_pattern() {
        let mut buf = vec![0xAAu8; 1000];
        fill_pattern(&mut buf);
        for (i, &b) in buf.iter().enumerate() {
            assert_eq!(b, expected_byte(i));
        }
        assert_eq!(buf[255], 255);
        assert_eq!(buf[256], 0);
        assert_eq!(buf[999], (999 % 256) as u8);
    }

    #[test]
    fn test_verify_match() {
        for len in [0, 1, 255, 256, 257, 4096 + 13] {
            let mut buf = vec![0u8; len];
            fill_pattern(&mut buf);
            let v = verify(&buf);
            assert!(v.all_same(), "len {}", len);
            assert_eq!(v.len(), len);
            assert_eq!(v.first_mismatch(), None);
        }
    }

    #[test]
    fn test_verify_mismatch() {
        let mut buf = vec![0u8; 1024];
        fill_pattern(&mut buf);
        buf[5] = 99;
        buf[700] = 0;

        let v = verify(&buf);
        assert!(!v.all_same());
        assert_eq!(v.mismatch_count(), 2);
        assert_eq!(
            v.first_mismatch(),
            Some(Mismatch {
                index: 5,
                expected: 5,
                actual: 99
            })
        );
        assert_eq!(v.mismatches()[1].index, 700);
        assert_eq!(v.mismatches()[1].expected, (700 % 256) as u8);
    }

    #[test]
    fn test_verify_caps_recorded() {
        // A zeroed buffer mismatches everywhere except at multiples of 256.
        let buf = vec![0u8; 2048];
        let v = verify(&buf);
        assert_eq!(v.mismatch_count(), 2048 - 8);
        assert_eq!(v.mismatches().len(), MAX_RECORDED_MISMATCHES);
        assert_eq!(v.elided(), 2048 - 8 - MAX_RECORDED_MISMATCHES);
        assert_eq!(v.first_mismatch().map(|m| m.index), Some(1));
    }

    #[test]
    fn test_throughput() {
        // 1 GiB in one second.
        assert_eq!(throughput_gbps(1 << 30, 1_000_000), 1.0);
        // 1 GiB in 250 ms.
        assert_eq!(throughput_gbps(1 << 30, 250_000), 4.0);
        // 1 MiB in 1 ms.
        let t = throughput_gbps(1 << 20, 1_000);
        assert!((t - 1000.0 / 1024.0).abs() < 1e-12);
        assert!(throughput_gbps(1, 0).is_infinite());
    }

    #[test]
    fn test_timing_sample() {
        let start = Instant::now();
        let end = start + Duration::from_micros(1500);
        assert_eq!(TimingSample::new(start, end).elapsed_us(), 1500);
    }
}
