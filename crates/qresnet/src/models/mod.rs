//! Complete model families.
pub mod qresnet;
