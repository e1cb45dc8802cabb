// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Layer
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Membership table, staleness culling and the default dispatch boundary

pub mod plugins;
pub mod registry;
pub mod sweeper;

pub use registry::{Registry, RegistryError};
pub use sweeper::{CullingConfig, CullingSweeper, HeartbeatInterests};
