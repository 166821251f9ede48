// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod schema;

pub use loader::{data_dir, load};
pub use schema::*;
