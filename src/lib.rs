pub mod assemble;
pub mod body;
pub mod camera;
pub mod config;
pub mod error;
pub mod fit;
pub mod motion;
pub mod pipeline;
pub mod pose;
pub mod render;
pub mod tracker;
pub mod video;
