pub mod config;
pub mod errors;
pub mod kernel;
pub mod stop;
pub mod store;
pub mod traits;
pub mod types;
