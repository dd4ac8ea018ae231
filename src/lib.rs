pub mod config;
pub mod ir;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod rpgm;
pub mod textutil;
