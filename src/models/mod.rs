// src/models/mod.rs

pub mod attempt;
pub mod exam;
pub mod session;
pub mod user;
pub mod violation;
