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

//! Map keys.
//!
//! Keys are immutable and compare by value. Each computes its hash once on
//! construction, since the same key is typically hashed into several maps
//! (and, for `FolderKey`, hashing the folder name is not free).

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

fn hash_of(parts: impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    parts.hash(&mut hasher);
    hasher.finish()
}

/// Identifies a user within a tenant context.
#[derive(Clone)]
pub struct UserKey {
    user_id: u32,
    context_id: u32,
    hash: u64,
}

impl UserKey {
    pub fn new(user_id: u32, context_id: u32) -> Self {
        UserKey {
            user_id,
            context_id,
            hash: hash_of((user_id, context_id)),
        }
    }

    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    pub fn context_id(&self) -> u32 {
        self.context_id
    }
}

impl PartialEq for UserKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.user_id == other.user_id
            && self.context_id == other.context_id
    }
}

impl Eq for UserKey {}

impl Hash for UserKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UserKey({}@{})", self.user_id, self.context_id)
    }
}

/// Identifies a folder within one of a user's mail accounts.
#[derive(Clone)]
pub struct FolderKey {
    account_id: u32,
    folder: String,
    hash: u64,
}

impl FolderKey {
    pub fn new(account_id: u32, folder: impl Into<String>) -> Self {
        let folder = folder.into();
        let hash = hash_of((account_id, &folder));
        FolderKey {
            account_id,
            folder,
            hash,
        }
    }

    pub fn account_id(&self) -> u32 {
        self.account_id
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }
}

impl PartialEq for FolderKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.account_id == other.account_id
            && self.folder == other.folder
    }
}

impl Eq for FolderKey {}

impl Hash for FolderKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for FolderKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FolderKey({}:{:?})", self.account_id, self.folder)
    }
}

/// Identifies the connections of one user to one mail account.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailAccessKey {
    pub user_id: u32,
    pub account_id: u32,
    pub context_id: u32,
}

impl MailAccessKey {
    pub fn new(user_id: u32, account_id: u32, context_id: u32) -> Self {
        MailAccessKey {
            user_id,
            account_id,
            context_id,
        }
    }

    pub fn user(&self) -> UserKey {
        UserKey::new(self.user_id, self.context_id)
    }
}

impl fmt::Debug for MailAccessKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "MailAccessKey({}@{}/{})",
            self.user_id, self.context_id, self.account_id
        )
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    fn hash(k: &impl Hash) -> u64 {
        let mut hasher = DefaultHasher::new();
        k.hash(&mut hasher);
        hasher.finish()
    }

    proptest! {
        #[test]
        fn folder_keys_compare_by_value(
            a_account in 0u32..4, a_folder in "[A-Z]{1,3}",
            b_account in 0u32..4, b_folder in "[A-Z]{1,3}"
        ) {
            let a = FolderKey::new(a_account, a_folder.clone());
            let b = FolderKey::new(b_account, b_folder.clone());
            prop_assert_eq!(
                a_account == b_account && a_folder == b_folder,
                a == b
            );
            if a == b {
                prop_assert_eq!(hash(&a), hash(&b));
            }
        }

        #[test]
        fn user_keys_compare_by_value(
            a in (0u32..3, 0u32..3), b in (0u32..3, 0u32..3)
        ) {
            let ka = UserKey::new(a.0, a.1);
            let kb = UserKey::new(b.0, b.1);
            prop_assert_eq!(a == b, ka == kb);
            if ka == kb {
                prop_assert_eq!(hash(&ka), hash(&kb));
            }
        }
    }

    #[test]
    fn keys_work_in_sets() {
        let mut set = HashSet::new();
        assert!(set.insert(FolderKey::new(0, "INBOX")));
        assert!(set.insert(FolderKey::new(1, "INBOX")));
        assert!(set.insert(FolderKey::new(0, "Sent")));
        assert!(!set.insert(FolderKey::new(0, "INBOX".to_owned())));
        assert_eq!(3, set.len());
    }
}
