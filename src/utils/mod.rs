pub mod errors;
pub mod filter;
pub mod logger;
pub mod psutils;
