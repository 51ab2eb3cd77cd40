//! Simulated message loss: one Bernoulli trial per datagram, with separate
//! probabilities for the request and reply directions. Callbacks count as
//! replies. The RNG is owned so scenario tests can seed it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct LossModel {
    p_request: f64,
    p_reply: f64,
    rng: StdRng,
}

impl LossModel {
    pub fn new(p_request: f64, p_reply: f64) -> LossModel {
        Self::with_rng(p_request, p_reply, StdRng::from_entropy())
    }

    pub fn from_seed(p_request: f64, p_reply: f64, seed: u64) -> LossModel {
        Self::with_rng(p_request, p_reply, StdRng::seed_from_u64(seed))
    }

    fn with_rng(p_request: f64, p_reply: f64, rng: StdRng) -> LossModel {
        LossModel {
            p_request,
            p_reply,
            rng,
        }
    }

    pub fn lossless() -> LossModel {
        Self::new(0.0, 0.0)
    }

    pub fn drop_request(&mut self) -> bool {
        self.trial(self.p_request)
    }

    pub fn drop_reply(&mut self) -> bool {
        self.trial(self.p_reply)
    }

    fn trial(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen::<f64>() < p
    }
}
