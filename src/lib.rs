pub mod logging;

pub mod api;
pub mod client;
pub mod feed;
pub mod model;
pub mod server;
pub mod storage;
pub mod validation;
