//! Document parsers: participation extraction, PDF text extraction, and the
//! structural chunkers that carve items out of monolithic packets.

pub mod chunker;
pub mod menlopark;
pub mod participation;
pub mod pdf;
