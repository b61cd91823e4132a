//! Initial sequence numbers and context ids for new connections.
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use crate::wire::TcpSeqNumber;

/// Distance between the initial sequence numbers of consecutive connections.
const ISS_STEP: u32 = 64_000;

/// Upper bound of the random increment per timer tick.
const ISS_JITTER: u32 = 0x1_0000;

/// Hands out the initial values of new connections.
///
/// Both values are free running counters. Every timer tick advances them by a pseudo random
/// amount, so that the next value is hard to predict from earlier connections.
pub struct Admission {
    counters: Mutex<Counters>,
}

struct Counters {
    iss: u32,
    context: u16,
    rng: StdRng,
}

impl Admission {
    /// Counters at random starting points.
    pub fn new() -> Self {
        Admission::from_rng(StdRng::from_entropy())
    }

    /// Counters at starting points derived from a seed.
    pub fn seeded(seed: u64) -> Self {
        Admission::from_rng(StdRng::seed_from_u64(seed))
    }

    /// Counters at fixed starting points, perturbed with a seeded generator.
    pub fn starting_at(iss: TcpSeqNumber, context: u16, seed: u64) -> Self {
        Admission {
            counters: Mutex::new(Counters {
                iss: iss.to_u32(),
                context,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    fn from_rng(mut rng: StdRng) -> Self {
        Admission {
            counters: Mutex::new(Counters {
                iss: rng.gen(),
                context: rng.gen(),
                rng,
            }),
        }
    }

    /// The initial sequence number for a new connection.
    pub fn next_iss(&self) -> TcpSeqNumber {
        let mut counters = self.counters.lock();
        let iss = counters.iss;
        counters.iss = iss.wrapping_add(ISS_STEP);
        TcpSeqNumber::from_u32(iss)
    }

    /// The context id for a new compressed connection.
    pub fn next_context(&self) -> u16 {
        let mut counters = self.counters.lock();
        let context = counters.context;
        counters.context = context.wrapping_add(1);
        context
    }

    /// Advance both counters by a random amount.
    pub fn perturb(&self) {
        let mut counters = self.counters.lock();
        let iss = counters.rng.gen_range(1..=ISS_JITTER);
        let context = counters.rng.gen_range(0..=3);
        counters.iss = counters.iss.wrapping_add(iss);
        counters.context = counters.context.wrapping_add(context);
    }
}

impl Default for Admission {
    fn default() -> Self {
        Admission::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn consecutive_values_differ() {
        let admission = Admission::starting_at(TcpSeqNumber(100), 7, 0);
        assert_eq!(admission.next_iss(), TcpSeqNumber(100));
        assert_eq!(admission.next_iss(), TcpSeqNumber(100 + ISS_STEP as i32));
        assert_eq!(admission.next_context(), 7);
        assert_eq!(admission.next_context(), 8);
    }

    #[test]
    fn perturb_moves_forward() {
        let admission = Admission::starting_at(TcpSeqNumber(0), 0, 42);
        admission.perturb();
        let iss = admission.next_iss();
        assert!(iss > TcpSeqNumber(0));
        assert!(iss <= TcpSeqNumber(ISS_JITTER as i32));
    }

    #[test]
    fn seeded_is_reproducible() {
        let a = Admission::seeded(5);
        let b = Admission::seeded(5);
        a.perturb();
        b.perturb();
        assert_eq!(a.next_iss(), b.next_iss());
        assert_eq!(a.next_context(), b.next_context());
    }

    #[test]
    fn counters_wrap() {
        let admission = Admission::starting_at(TcpSeqNumber::from_u32(u32::MAX), u16::MAX, 0);
        assert_eq!(admission.next_iss(), TcpSeqNumber::from_u32(u32::MAX));
        assert_eq!(admission.next_iss(), TcpSeqNumber::from_u32(ISS_STEP - 1));
        assert_eq!(admission.next_context(), u16::MAX);
        assert_eq!(admission.next_context(), 0);
    }
}
