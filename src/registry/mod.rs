//! Registry Module
//!
//! This module keeps track of every administered server and runs commands
//! against one, several or all of them at once.
//!
//! ## Architecture
//!
//! ```text
//!             Target (All | address | handle)
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │                  Registry                    │
//! │  ┌────────────┐ ┌────────────┐ ┌──────────┐  │
//! │  │ Connection │ │ Connection │ │   ...    │  │
//! │  │  host:port │ │  host:port │ │          │  │
//! │  └────────────┘ └────────────┘ └──────────┘  │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!                        ▼
//!            FanOut<T> (one Outcome per server)
//! ```

pub mod manager;
pub mod target;

pub use manager::{Registry, RegistryError};
pub use target::{FanOut, Outcome, Target};
