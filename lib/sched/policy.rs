//! Scheduling discipline selection and tuning.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Discipline used to order pending transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Shortest job first: the transfer with the fewest remaining bytes
    /// runs next, and runs to completion in a single turn.
    Sjf,
    /// Round robin: transfers take fixed-quantum turns in FIFO rotation.
    RoundRobin,
    /// Multi-level feedback: transfers start on the top queue with the base
    /// quantum; whoever exhausts a turn without finishing drops one level
    /// and gets twice the quantum next time.
    Mlfb,
}

/// The string did not name a known policy.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown scheduling policy {0:?}, expected one of SJF, RR, MLFB")]
pub struct PolicyParseError(String);

impl FromStr for Policy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("sjf") {
            Ok(Self::Sjf)
        } else if s.eq_ignore_ascii_case("rr") {
            Ok(Self::RoundRobin)
        } else if s.eq_ignore_ascii_case("mlfb") {
            Ok(Self::Mlfb)
        } else {
            Err(PolicyParseError(s.to_owned()))
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sjf => "SJF",
            Self::RoundRobin => "RR",
            Self::Mlfb => "MLFB",
        })
    }
}

/// Knobs controlling queue behavior.
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    /// Byte budget per turn for quantum-based policies.
    pub quantum: u64,
    /// Number of feedback levels for MLFB.
    pub levels: usize,
    /// Bound on admitted-but-unfinished transfers; `None` never refuses.
    pub capacity: Option<usize>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            quantum: 8192,
            levels: 3,
            capacity: None,
        }
    }
}
