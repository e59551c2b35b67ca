//! Utility modules for patx-ex

pub mod color;
pub mod decoder;
pub mod flush_cache;

pub use color::rgb_to_hex;
pub use decoder::{DecodedAudio, DecodedInput, FileDecoder, InputKind, MediaDecoder, PixelGrid};
pub use flush_cache::{CacheEntry, FlushOnDemand};
