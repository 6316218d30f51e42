//! Datapath integration tests
//!
//! Each test builds a router through the public `Controller` API, feeds
//! hand-built frames to `Datapath::process` and inspects what comes out.
//!
//! Run with: cargo test --test datapath

mod harness;

mod concurrency;
mod ftp;
mod local;
mod routing;
mod rules;
mod tunnel;
