// src/services/mod.rs

pub mod attempt;
pub mod auth;
pub mod proctor;
pub mod scoring;
