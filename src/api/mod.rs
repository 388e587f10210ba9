pub mod courier;
pub mod utils;
