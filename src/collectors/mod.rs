pub mod w3wp;
pub mod win_services;

pub use w3wp::{AppPoolMetric, W3wp, W3wpEngine};
pub use win_services::{ServiceRecord, WinServices};
