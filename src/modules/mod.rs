pub mod health;
pub mod transcode;
