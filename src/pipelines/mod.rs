pub mod executor;
pub mod slamseq;
