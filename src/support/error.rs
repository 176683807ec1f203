//-
// Copyright (c) 2026, the Mailcache authors
//
// This file is part of Mailcache.
//
// Mailcache is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailcache is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailcache. If not, see <http://www.gnu.org/licenses/>.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// The failure cause a deferred computation settles with.
///
/// It is shared, since every thread waiting on the same deferred value
/// observes the same cause.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// What a deferred computation returns on failure before it is shared.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Deferred computation failed: {0}")]
    Computation(#[source] Cause),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Account lookup failed: {0}")]
    AccountLookup(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

