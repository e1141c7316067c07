// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stateful reliable writer.
//!
//! | Component | Role |
//! |-----------|------|
//! | `ReliableWriter` | Write path, reader matching, ACKNACK/NACKFRAG handling |
//! | `ReaderProxy` | Per-reader records and the ack low-water-mark |
//! | `delivery` | DATA / DATA_FRAG / GAP emission for one sample |
//! | `timers` | Heartbeat, nack-response and nack-suppression deadlines |

mod builder;
mod delivery;
mod heartbeat;
mod listener;
mod reader_proxy;
mod stateful_writer;
mod timers;

pub use builder::ReliableWriterBuilder;
pub use listener::WriterListener;
pub use reader_proxy::{ChangeForReader, ChangeForReaderStatus, ReaderProxy, ReaderSnapshot};
pub use stateful_writer::{ReliableWriter, RemovalPolicy};
