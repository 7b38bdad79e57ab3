//! RNG adapter: answers the engine's random-byte callback.
//!
//! # Where do the bytes come from? (for beginners)
//!
//! Output always comes from a [`SecureSource`], by default the operating
//! system CSPRNG ([`OsEntropy`]).  The adapter also keeps a 32-bit *seed
//! mix* built from the wall clock and any entropy the caller supplies:
//!
//! ```text
//! seed = clock
//! for byte in entropy { seed = seed * 31 + byte }   (wrapping)
//! ```
//!
//! The mix is **not** used for output while the secure source works.  It
//! only seeds the fallback generator, and the fallback runs only when the
//! adapter was built with [`FallbackPolicy::AllowInsecure`].
//!
//! # The fallback is not cryptographic
//!
//! Fallback bytes come from `rand::rngs::SmallRng`, which is fast and
//! predictable.  Every fallback call logs a warning and records
//! [`EntropyOrigin::InsecureFallback`], so callers can refuse such keys.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::{OsRng, SmallRng};
use rand::{RngCore, SeedableRng};
use tracing::{debug, warn};
use wirebridge_core::engine::{RandomSource, RngError};

/// Whether `random` may fall back to a non-cryptographic generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Secure source failures are reported as `GenerationFailed`.
    #[default]
    Deny,
    /// Secure source failures are papered over with `SmallRng` output.
    AllowInsecure,
}

/// Which generator produced the most recent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyOrigin {
    Os,
    InsecureFallback,
}

/// A cryptographically secure byte source.
#[cfg_attr(test, mockall::automock)]
pub trait SecureSource {
    /// Fills `out`, returning how many bytes were written.  A count below
    /// `out.len()` is a short read.
    fn fill(&mut self, out: &mut [u8]) -> io::Result<usize>;
}

/// The operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl SecureSource for OsEntropy {
    fn fill(&mut self, out: &mut [u8]) -> io::Result<usize> {
        OsRng
            .try_fill_bytes(out)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(out.len())
    }
}

/// Folds `entropy` into `clock` with `seed = seed * 31 + byte`.
pub fn mix_seed(clock: u32, entropy: &[u8]) -> u32 {
    entropy.iter().fold(clock, |seed, &byte| {
        seed.wrapping_mul(31).wrapping_add(u32::from(byte))
    })
}

fn clock_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Random-byte adapter for a secure-channel engine.
#[derive(Debug)]
pub struct RngAdapter<S: SecureSource = OsEntropy> {
    source: S,
    policy: FallbackPolicy,
    initialized: bool,
    seed: u32,
    last_origin: Option<EntropyOrigin>,
}

impl RngAdapter<OsEntropy> {
    /// An unseeded adapter over the OS CSPRNG.
    pub fn new() -> Self {
        Self::with_source(OsEntropy)
    }
}

impl Default for RngAdapter<OsEntropy> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SecureSource> RngAdapter<S> {
    /// An unseeded adapter over a custom secure source.
    pub fn with_source(source: S) -> Self {
        Self {
            source,
            policy: FallbackPolicy::Deny,
            initialized: false,
            seed: 0,
            last_origin: None,
        }
    }

    pub fn with_fallback(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Mixes optional caller entropy with the current time and marks the
    /// adapter initialized.
    pub fn seed(&mut self, entropy: Option<&[u8]>) {
        self.seed_with_clock(clock_seconds(), entropy);
    }

    /// [`seed`](Self::seed) with an explicit clock value.
    pub fn seed_with_clock(&mut self, clock: u32, entropy: Option<&[u8]>) {
        self.seed = mix_seed(clock, entropy.unwrap_or_default());
        self.initialized = true;
        debug!(entropy_len = entropy.map_or(0, <[u8]>::len), "rng adapter seeded");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current seed mix.  Only meaningful once seeded.
    pub fn seed_value(&self) -> u32 {
        self.seed
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Origin of the bytes produced by the last successful `random` call.
    pub fn last_origin(&self) -> Option<EntropyOrigin> {
        self.last_origin
    }

    /// Zeroes all state.  Idempotent.
    pub fn free(&mut self) {
        self.initialized = false;
        self.seed = 0;
        self.last_origin = None;
    }

    fn fill_insecure(&mut self, out: &mut [u8]) {
        let mut rng = SmallRng::seed_from_u64(u64::from(self.seed));
        rng.fill_bytes(out);
        self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        self.last_origin = Some(EntropyOrigin::InsecureFallback);
    }
}

impl<S: SecureSource> RandomSource for RngAdapter<S> {
    fn random(&mut self, out: &mut [u8]) -> Result<(), RngError> {
        if !self.initialized || out.is_empty() {
            return Err(RngError::NotInitialized);
        }

        let requested = out.len();
        let produced = match self.source.fill(out) {
            Ok(n) => n.min(requested),
            Err(e) => {
                debug!(error = %e, "secure entropy source failed");
                0
            }
        };

        if produced == requested {
            self.last_origin = Some(EntropyOrigin::Os);
            return Ok(());
        }

        match self.policy {
            FallbackPolicy::Deny => Err(RngError::GenerationFailed { requested, produced }),
            FallbackPolicy::AllowInsecure => {
                warn!(
                    requested,
                    produced, "secure entropy unavailable; using NON-CRYPTOGRAPHIC fallback generator"
                );
                self.fill_insecure(out);
                Ok(())
            }
        }
    }
}

impl<S: SecureSource> Drop for RngAdapter<S> {
    fn drop(&mut self) {
        self.free();
    }
}
