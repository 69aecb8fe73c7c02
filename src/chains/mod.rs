pub mod arbitrum;
