//! PSRP fragment framing.
//!
//! Every PSRP message travels inside one or more fragments:
//! `object_id (u64 BE) | fragment_id (u64 BE) | flags (u8) | length (u32 BE) | data`.
mod defragmenter;
mod fragment;
mod fragmenter;

pub use defragmenter::*;
pub use fragment::*;
pub use fragmenter::*;
