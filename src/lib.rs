// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;
mod publisher;

#[cfg(test)]
mod memory;

pub mod buffer;
pub mod channel;
pub mod client;
pub mod configs;
pub mod connection;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod healing;
pub mod interceptor;
pub mod messaging;
pub mod payload;
pub mod queue;
pub mod registry;
pub mod topology;
