// src/session/room.rs
//
// Room identity: the 6-character code both devices share, the broadcast
// channel derived from it, and the per-race / per-device identifiers.

use rand::Rng;

/// Code alphabet with the ambiguous characters (I, O, 0, 1) removed.
pub const ROOM_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const ROOM_CODE_LEN: usize = 6;

pub fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_ALPHABET[rng.gen_range(0..ROOM_ALPHABET.len())] as char)
        .collect()
}

/// Broadcast channel for a room code.
pub fn channel_for(code: &str) -> String {
    format!("race-{}", code)
}

/// Fresh race identifier, generated by the room creator.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Per-device identifier, generated once at process start.
pub fn new_sender_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_length_and_alphabet() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.bytes().all(|b| ROOM_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_alphabet_has_no_ambiguous_characters() {
        for forbidden in [b'I', b'O', b'0', b'1'] {
            assert!(!ROOM_ALPHABET.contains(&forbidden));
        }
        assert_eq!(ROOM_ALPHABET.len(), 32);
    }

    #[test]
    fn test_channel_naming() {
        assert_eq!(channel_for("AB23CD"), "race-AB23CD");
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
        assert_ne!(new_sender_id(), new_sender_id());
    }
}
