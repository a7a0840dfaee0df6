pub mod loader;
pub mod net;
pub mod preprocess;
pub mod service;
