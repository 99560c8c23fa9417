//! Verified gateway for a Telegram Mini App that shows Last.fm and Spotify
//! listening statistics.
//!
//! The load-bearing pieces are [`telegram`], which proves a request payload
//! really came from the Telegram client, and [`spotify::token`], which keeps
//! a usable Spotify bearer token on hand via pool rotation and
//! client-credentials fallback. The rest is verified pass-through to the
//! upstream stats APIs.

pub mod config;
pub mod download;
pub mod error;
pub mod handlers;
pub mod lastfm;
pub mod spotify;
pub mod store;
pub mod telegram;
