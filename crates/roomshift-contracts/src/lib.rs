//! Plain data shared by the roomshift engine and its front ends: image
//! assets, aspect ratios, version history, session events, exports, chat
//! commands and the image model table.

pub mod aspect;
pub mod assets;
pub mod chat;
pub mod events;
pub mod export;
pub mod history;
pub mod models;
