pub mod classify;
pub mod config;
pub mod frame;
pub mod geometry;
pub mod landmark;
pub mod publish;
