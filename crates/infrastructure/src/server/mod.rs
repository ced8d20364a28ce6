pub mod clients;
pub mod handler;
pub mod ratelimit;
pub mod synth;

pub use clients::{ClientRegistry, EffectiveSettings};
pub use handler::WardenHandler;
pub use ratelimit::RateLimiter;
pub use synth::Synthesizer;
