//! The contact directory (§3 Data Model): cached identity keys and
//! trust/block state for peers a session may be established with.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::identity::fingerprint_of;

/// A directory entry for a known peer.
#[derive(Debug, Clone)]
pub struct Contact {
    pub user_id: String,
    pub display_name: String,
    pub sig_pub: [u8; 32],
    pub dh_pub: [u8; 32],
    pub verified: bool,
    pub blocked: bool,
}

impl Contact {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>, sig_pub: [u8; 32], dh_pub: [u8; 32]) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            sig_pub,
            dh_pub,
            verified: false,
            blocked: false,
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.sig_pub, &self.dh_pub)
    }
}

/// An in-memory directory of known contacts, keyed by `user_id`.
///
/// A `Contact`'s cached identity keys only change through
/// [`ContactBook::upsert`] — callers are expected to treat a key change on an
/// already-`verified` contact as a security event (re-verify, don't
/// silently trust) rather than a routine update.
#[derive(Default)]
pub struct ContactBook {
    contacts: RwLock<HashMap<String, Contact>>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> Option<Contact> {
        self.contacts.read().get(user_id).cloned()
    }

    /// Insert or replace a contact's cached keys. Returns `true` if this
    /// replaced a previously different key for a contact already marked
    /// `verified` — the caller should treat that as an identity-mismatch
    /// event, not silently accept it.
    pub fn upsert(&self, contact: Contact) -> bool {
        let mut contacts = self.contacts.write();
        let flips_trust = match contacts.get(&contact.user_id) {
            Some(existing) => existing.verified && (existing.sig_pub != contact.sig_pub || existing.dh_pub != contact.dh_pub),
            None => false,
        };
        contacts.insert(contact.user_id.clone(), contact);
        flips_trust
    }

    pub fn set_verified(&self, user_id: &str, verified: bool) -> bool {
        let mut contacts = self.contacts.write();
        if let Some(c) = contacts.get_mut(user_id) {
            c.verified = verified;
            true
        } else {
            false
        }
    }

    pub fn set_blocked(&self, user_id: &str, blocked: bool) -> bool {
        let mut contacts = self.contacts.write();
        if let Some(c) = contacts.get_mut(user_id) {
            c.blocked = blocked;
            true
        } else {
            false
        }
    }

    pub fn remove(&self, user_id: &str) -> Option<Contact> {
        self.contacts.write().remove(user_id)
    }

    pub fn len(&self) -> usize {
        self.contacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_flags_key_change_on_verified_contact() {
        let book = ContactBook::new();
        let mut alice = Contact::new("alice", "Alice", [1u8; 32], [2u8; 32]);
        book.upsert(alice.clone());
        book.set_verified("alice", true);

        alice.dh_pub = [9u8; 32];
        let flips_trust = book.upsert(alice);
        assert!(flips_trust);
    }

    #[test]
    fn upsert_does_not_flag_change_on_unverified_contact() {
        let book = ContactBook::new();
        let mut alice = Contact::new("alice", "Alice", [1u8; 32], [2u8; 32]);
        book.upsert(alice.clone());

        alice.dh_pub = [9u8; 32];
        let flips_trust = book.upsert(alice);
        assert!(!flips_trust);
    }

    #[test]
    fn block_and_remove() {
        let book = ContactBook::new();
        book.upsert(Contact::new("bob", "Bob", [3u8; 32], [4u8; 32]));
        assert!(book.set_blocked("bob", true));
        assert!(book.get("bob").unwrap().blocked);
        assert!(book.remove("bob").is_some());
        assert!(book.get("bob").is_none());
    }
}
