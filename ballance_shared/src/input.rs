//! Movement keys.
//!
//! On the wire keys travel as string tokens (`"w"`, `"a"`, `"s"`, `"d"`);
//! internally they are a small flag set.

use crate::error::InvalidInputError;

bitflags::bitflags! {
    /// Held movement keys.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveKeys: u8 {
        const FORWARD = 1 << 0;
        const BACK = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

impl MoveKeys {
    /// Parses a key token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "w" => Some(Self::FORWARD),
            "s" => Some(Self::BACK),
            "a" => Some(Self::LEFT),
            "d" => Some(Self::RIGHT),
            _ => None,
        }
    }

    /// Parses a full token list. One unknown token rejects the whole list.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, InvalidInputError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tokens.into_iter().try_fold(Self::empty(), |keys, t| {
            let t = t.as_ref();
            Self::from_token(t)
                .map(|k| keys | k)
                .ok_or_else(|| InvalidInputError::UnknownKey(t.to_string()))
        })
    }

    /// Wire tokens in `w`, `s`, `a`, `d` order.
    pub fn to_tokens(self) -> Vec<String> {
        [
            (Self::FORWARD, "w"),
            (Self::BACK, "s"),
            (Self::LEFT, "a"),
            (Self::RIGHT, "d"),
        ]
        .into_iter()
        .filter(|(k, _)| self.contains(*k))
        .map(|(_, t)| t.to_string())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_map_to_keys() {
        let keys = MoveKeys::from_tokens(["w", "d", "w"]).unwrap();
        assert_eq!(keys, MoveKeys::FORWARD | MoveKeys::RIGHT);
        assert_eq!(keys.to_tokens(), vec!["w".to_string(), "d".to_string()]);
    }

    #[test]
    fn unknown_token_rejects_list() {
        assert_eq!(
            MoveKeys::from_tokens(["w", "space"]),
            Err(InvalidInputError::UnknownKey("space".to_string()))
        );
    }

    #[test]
    fn no_tokens_is_empty() {
        let none: [&str; 0] = [];
        assert!(MoveKeys::from_tokens(none).unwrap().is_empty());
    }
}
