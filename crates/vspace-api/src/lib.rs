//! vspace-api: HTTP implementation of the account backend contract

pub mod client;

pub use client::HttpAccountBackend;
