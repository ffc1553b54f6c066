pub mod algorithm;
pub mod capacity_margin;
pub mod decision;
