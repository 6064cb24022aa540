//! Tag dialect detection and decoding.

pub mod encoding;
pub mod id3v2;
pub mod mp4;
pub mod normalize;
pub mod reader;
pub mod sniff;

pub use normalize::Dialect;
pub use sniff::{sniff, ContainerKind};
