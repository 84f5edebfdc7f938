//! Link Collector Library
//!
//! Collects Telegram and WhatsApp group links from the chat history of
//! logged-in user sessions and manages them from a Telegram control bot.
//!
//! This crate provides the core functionality for:
//! - Loading settings and validating the control bot token
//! - Recognizing and classifying chat links
//! - Persisting sessions, links and collection runs in `SQLite`
//! - Reading chat history over `MTProto` and running the collector
//! - Extracting links from uploaded text files, archives and databases
//! - Driving everything from an inline-button bot menu
//! - Preparing the installation before the bot starts

pub mod bootstrap;
pub mod bot;
pub mod collector;
pub mod commands;
pub mod config;
pub mod files;
pub mod links;
pub mod sessions;
pub mod storage;
pub mod telegram;
