//! Note handlers

pub mod delete;
