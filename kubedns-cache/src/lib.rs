//! Two response caches behind the same conceptual contract (fill
//! on resolver success, read on request): [`message`]'s `MessageCache`
//! for the standard profile, [`wire`]'s `WireCache` for the
//! high-throughput ("killer") profile.

pub mod message;
#[cfg(feature = "killer")]
pub mod wire;

pub use message::MessageCache;
#[cfg(feature = "killer")]
pub use wire::WireCache;

/// Sizing for the standard-profile [`MessageCache`]. The killer-profile
/// [`WireCache`] has no tunables — its slotted ring is fixed-size — so
/// it is constructed directly by the caller when killer mode is active.
#[derive(Debug, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub message: message::Config,
}

impl Config {
    pub fn build(self) -> MessageCache {
        self.message.build()
    }
}
