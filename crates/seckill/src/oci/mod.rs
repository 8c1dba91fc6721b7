// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Oracle Cloud Infrastructure provider.
//!
//! [`OciClient`] speaks the Core Services and Identity REST APIs, signing
//! every request with [`RequestSigner`].

pub mod client;
pub mod models;
pub mod signer;

pub use client::{OciClient, core_endpoint, identity_endpoint};
pub use signer::{RequestSigner, SignedHeaders};
