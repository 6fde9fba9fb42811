//! # beaconwatch-server
//!
//! HTTP host for the beaconwatch coordinator.
//!
//! This library provides the API handlers and state management. An
//! out-of-process scanning engine posts its callbacks to `/api/engine/*`;
//! applications read live events from `/api/events` and drain deferred
//! records from `/api/deferred`.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
