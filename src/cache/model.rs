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

//! The parts of a rendered message the cache itself touches.
//!
//! Rendered messages are JSON objects produced elsewhere; the cache only
//! knows about the handful of fields it keeps current in place when flags
//! change: the system flags bitmask, the folder's unread count, and the
//! color label.

use std::convert::TryFrom;

use bitflags::bitflags;
use serde_json::Value;

pub const FLAGS_FIELD: &str = "flags";
pub const UNREAD_FIELD: &str = "unread";
pub const COLOR_LABEL_FIELD: &str = "color_label";

bitflags! {
    /// System message flags, as encoded in the `flags` field.
    #[derive(Default)]
    pub struct MailFlags: u32 {
        const ANSWERED = 1;
        const DELETED = 2;
        const DRAFT = 4;
        const FLAGGED = 8;
        const RECENT = 16;
        const SEEN = 32;
        const USER = 64;
        const SPAM = 128;
        const FORWARDED = 256;
        const READ_ACK = 512;
    }
}

/// Read the flags of `message`.
///
/// Missing or malformed fields read as no flags.
pub fn flags(message: &Value) -> MailFlags {
    MailFlags::from_bits_truncate(raw_flags(message))
}

fn raw_flags(message: &Value) -> u32 {
    message
        .get(FLAGS_FIELD)
        .and_then(Value::as_u64)
        .and_then(|raw| u32::try_from(raw).ok())
        .unwrap_or(0)
}

/// Set or clear `mask` in the flags of `message`.
///
/// Bits outside `MailFlags` are preserved. Does nothing if `message` is not
/// a JSON object.
pub fn update_flags(message: &mut Value, mask: MailFlags, set: bool) {
    let current = raw_flags(message);
    let updated = if set {
        current | mask.bits()
    } else {
        current & !mask.bits()
    };
    if let Some(object) = message.as_object_mut() {
        object.insert(FLAGS_FIELD.to_owned(), Value::from(updated));
    }
}

pub fn set_unread(message: &mut Value, unread: u32) {
    if let Some(object) = message.as_object_mut() {
        object.insert(UNREAD_FIELD.to_owned(), Value::from(unread));
    }
}

pub fn set_color_label(message: &mut Value, color_label: u32) {
    if let Some(object) = message.as_object_mut() {
        object.insert(COLOR_LABEL_FIELD.to_owned(), Value::from(color_label));
    }
}
