//! An echo client and server for sixtcp, both on one in-process loop-back network.
mod pattern;
mod score;

pub mod config;
pub mod echo;
pub use score::Score;
