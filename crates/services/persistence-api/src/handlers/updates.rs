//! Update log handlers

pub mod append;
pub mod clear;
pub mod get_all;
