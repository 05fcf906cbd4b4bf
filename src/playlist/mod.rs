//! Playlist model, renderer, and parser — spec §4.7, §4.8.

pub mod parse;
pub mod render;

pub use parse::{parse_playlist, Playlist};
pub use render::{render_master_playlist, render_media_playlist};
