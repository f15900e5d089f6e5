// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic point identity and collection naming.

use uuid::Uuid;

/// Name of a user's collection.
pub fn collection_name(user_id: i64) -> String {
    format!("telegram_posts_{user_id}")
}

/// Deterministic UUIDv5 point id for a post chunk.
///
/// Derived from `post_{id}_chunk_{i}`, so re-indexing a post overwrites its
/// previous points and targeted deletes need no lookup table.
pub fn chunk_point_id(post_id: i64, chunk_index: usize) -> String {
    let name = format!("post_{post_id}_chunk_{chunk_index}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_are_per_user() {
        assert_eq!(collection_name(42), "telegram_posts_42");
        assert_ne!(collection_name(1), collection_name(2));
    }

    #[test]
    fn point_ids_are_deterministic() {
        let a = chunk_point_id(7, 0);
        let b = chunk_point_id(7, 0);
        assert_eq!(a, b, "re-indexing must hit the same point id");
        assert_ne!(chunk_point_id(7, 0), chunk_point_id(7, 1));
        assert_ne!(chunk_point_id(7, 0), chunk_point_id(8, 0));
    }

    #[test]
    fn point_ids_are_uuid_shaped() {
        let id = chunk_point_id(123, 4);
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
