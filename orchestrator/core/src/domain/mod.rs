// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Pure types shared by every ACP component plus the collaborator traits the
//! services are wired through.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Message model, behavior packages, control results, trace and
//!   transport seams, node configuration

pub mod behavior;
pub mod control;
pub mod message;
pub mod node_config;
pub mod tool;
pub mod trace;
pub mod transport;
