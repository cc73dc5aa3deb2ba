// SPDX-License-Identifier: Apache-2.0

//! Live driver implementations of [`crate::connection::Connection`].

pub mod postgres;
