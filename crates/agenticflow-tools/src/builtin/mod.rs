pub mod data;
pub mod file;
pub mod network;
