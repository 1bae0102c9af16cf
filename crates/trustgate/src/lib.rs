// Trustgate
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Trustgate authorization core
//!
//! This crate provides the trust layer that gates privileged workflow
//! operations: credential-based sessions, role-based permissions, signed
//! resource indicators, sliding-window rate limiting, an audit trail and
//! per-operation error boundaries.
//!
//! The [`gate::TrustGate`] facade wires every store together and is the
//! surface an operation dispatcher talks to.

pub mod audit;
pub mod boundary;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gate;
pub mod rate_limiting;
pub mod rbac;
pub mod resource_indicator;
pub mod session;
pub mod token;
pub mod users;

pub use error::{GuardError, GuardResult};
pub use gate::TrustGate;
