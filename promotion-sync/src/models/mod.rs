//! Domain models for Release Bundle promotions.

pub mod bundle;
pub mod promotion;
pub mod report;
