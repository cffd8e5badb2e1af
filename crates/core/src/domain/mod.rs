pub mod decision;
pub mod expense;
pub mod rule;
