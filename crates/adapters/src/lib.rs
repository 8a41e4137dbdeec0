//! tikdog adapters crate
//!
//! This crate contains infrastructure adapters implementing the domain ports:
//! - `tiktok`: TikTok web API feeds with challenge handling
//! - `telegram`: Telegram Bot API channel
//! - `media`: HTTP media store with download validation
//! - `ffmpeg`: Audio tagging through ffmpeg
//! - `memory`: In-memory feed and channel

pub mod ffmpeg;
pub mod media;
pub mod memory;
pub mod telegram;
pub mod tiktok;
