//! Conversational sessions

mod gateway;

pub use gateway::{SessionGateway, SessionOptions};
