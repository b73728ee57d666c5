//! Result of one client run.

use std::fmt;

use super::verify::{self, TimingSample, Verification};

/// Number of leading received bytes echoed in the report.
pub const PREVIEW_LEN: usize = 20;

/// What a completed run observed.
#[derive(Debug, Clone)]
pub struct Report {
    preview: Vec<u8>,
    verification: Verification,
    bytes: usize,
    elapsed_us: u64,
}

impl Report {
    /// Verify `buf` and pair it with the transfer timing.
    pub fn new(buf: &[u8], timing: TimingSample) -> Self {
        Report {
            preview: buf[..buf.len().min(PREVIEW_LEN)].to_vec(),
            verification: verify::verify(buf),
            bytes: buf.len(),
            elapsed_us: timing.elapsed_us(),
        }
    }

    /// The first received bytes.
    pub fn preview(&self) -> &[u8] {
        &self.preview
    }

    pub fn verification(&self) -> &Verification {
        &self.verification
    }

    /// Whether the payload matched the pattern everywhere.
    pub fn all_same(&self) -> bool {
        self.verification.all_same()
    }

    /// Size of the received message.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Time from posting the receive to reaping its completion.
    pub fn latency_us(&self) -> u64 {
        self.elapsed_us
    }

    /// Throughput in GB/s.
    pub fn throughput_gbps(&self) -> f64 {
        verify::throughput_gbps(self.bytes, self.elapsed_us)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recv_msg: ")?;
        for b in &self.preview {
            write!(f, "{} ", b)?;
        }
        writeln!(f)?;

        for m in self.verification.mismatches() {
            writeln!(
                f,
                "error: mismatch at index {}, expect {}, actual {}",
                m.index, m.expected, m.actual
            )?;
        }
        if self.verification.elided() > 0 {
            writeln!(
                f,
                "error: {} more mismatches not shown",
                self.verification.elided()
            )?;
        }

        writeln!(
            f,
            "is all same: {}",
            if self.all_same() { "YES" } else { "NO" }
        )?;
        writeln!(f, "Throughput: {:.4} GB/s", self.throughput_gbps())?;
        write!(f, "Latency: {} us", self.elapsed_us)
    }
}
