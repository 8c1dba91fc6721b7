// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider module - cloud API boundary.

pub mod mock;
mod traits;

pub use mock::MockCloud;
pub use traits::*;
