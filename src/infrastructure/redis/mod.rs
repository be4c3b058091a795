pub mod client;

pub use client::RedisService;
