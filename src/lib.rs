pub mod accessibility;
pub mod config;
pub mod corridor;
pub mod decay;
pub mod graph;
pub mod logging;
pub mod network;
pub mod routing;
