//! Core domain types for the purge pipeline.
//!
//! This module contains pure domain types with no persistence dependencies:
//! - Purge items and their types
//! - Request batches grouped by type
//! - The provider's response envelope

pub mod batch;
pub mod item;
pub mod response;

pub use batch::{PurgeBatch, make_purge_request};
pub use item::{PurgeInput, PurgeItem, PurgeItemId, PurgeType, Purgeable, RawPurgeInput};
pub use response::{ApiResponse, InfoValue, ResponseInfo};
