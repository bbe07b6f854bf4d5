//! Merges recalled memories and recent turns into the message list sent to
//! generation.
use crate::schema::{BufferEntry, ContextMessage, MemoryMatch, Role};

/// Semantic matches first, as `user` messages in the order recalled
/// (nearest first), followed by the session's turns oldest first.
///
/// Nothing is de-duplicated or truncated; fitting the result into a token
/// budget is the caller's job.
pub fn assemble(semantic_matches: &[MemoryMatch], buffer_entries: &[BufferEntry]) -> Vec<ContextMessage> {
    semantic_matches
        .iter()
        .map(|m| ContextMessage {
            role: Role::User,
            content: m.text.clone(),
        })
        .chain(buffer_entries.iter().map(|entry| ContextMessage {
            role: entry.role,
            content: entry.content.clone(),
        }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recalled(vector_id: u64, text: &str, distance: f32) -> MemoryMatch {
        MemoryMatch {
            vector_id,
            text: text.to_string(),
            distance,
        }
    }

    #[test]
    fn memories_precede_turns() {
        let matches = vec![recalled(4, "closest", 0.1), recalled(1, "next", 0.7)];
        let turns = vec![
            BufferEntry::new(Role::User, "question"),
            BufferEntry::new(Role::Assistant, "answer"),
            BufferEntry::new(Role::User, "follow-up"),
        ];

        let messages = assemble(&matches, &turns);
        let flat: Vec<(Role, &str)> = messages.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(
            flat,
            vec![
                (Role::User, "closest"),
                (Role::User, "next"),
                (Role::User, "question"),
                (Role::Assistant, "answer"),
                (Role::User, "follow-up"),
            ]
        );
    }

    #[test]
    fn no_matches_yields_exactly_the_buffer() {
        let turns = vec![
            BufferEntry::new(Role::User, "a"),
            BufferEntry::new(Role::Assistant, "b"),
        ];
        let messages = assemble(&[], &turns);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().zip(&turns).all(|(m, t)| m.role == t.role && m.content == t.content));
    }

    #[test]
    fn duplicates_are_kept() {
        let matches = vec![recalled(0, "same", 0.0)];
        let turns = vec![BufferEntry::new(Role::User, "same")];
        assert_eq!(assemble(&matches, &turns).len(), 2);
    }
}
