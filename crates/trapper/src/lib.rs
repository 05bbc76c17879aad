/*
 * SPDX-FileCopyrightText: 2024 A3Mailer Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Trapper
//!
//! Receives item values pushed by senders and agents over TCP and hands them
//! to the alerting service for evaluation.

pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use codec::FrameCodec;
pub use config::TrapperConfig;
pub use error::{Result, TrapperError};
pub use protocol::{SenderRequest, SenderResponse, SenderValue};
pub use server::TrapperServer;
