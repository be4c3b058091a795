pub mod dto;
pub mod events;
pub mod handler;
pub mod model;
pub mod publisher;
