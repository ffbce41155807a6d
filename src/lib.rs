//! Remote playback session controller.
//!
//! `remoteplay` controls playback on a remote device of a streaming account:
//! it logs in through the authorization code flow, makes its device the
//! account's active device before every command, dispatches playback
//! commands with bounded retries and interpolates the playback position
//! between the device's sparse state notifications.
//!
//! The heart of the crate is [`controller::Controller`]. It talks to the
//! playback SDK through the traits in [`sdk`] and to the remote control API
//! through [`remote::DeviceControl`]. [`connect`] implements the SDK
//! boundary on top of the Web API, so that any Connect device of the account
//! can be driven headlessly.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

#[macro_use]
extern crate log;

pub mod auth;
pub mod catalog;
pub mod config;
pub mod connect;
pub mod controller;
pub mod error;
pub mod events;
pub mod http;
pub mod player;
pub mod position;
pub mod protocol;
pub mod remote;
pub mod retry;
pub mod sdk;
pub mod settings;
pub mod signal;
pub mod tokens;
