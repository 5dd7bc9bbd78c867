use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                let id = s.into();
                assert!(!id.is_empty(), "{} cannot be empty", stringify!($name));
                Self(id)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

id_newtype!(ChatId);
id_newtype!(ConversationId);
id_newtype!(ToolCallId);
id_newtype!(ToolName);

impl ChatId {
    /// Generate a fresh random chat id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl ConversationId {
    /// Generate a fresh random conversation id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "ChatId cannot be empty")]
    fn chat_id_empty_string_panics() {
        ChatId::new("");
    }

    #[test]
    #[should_panic(expected = "ToolCallId cannot be empty")]
    fn tool_call_id_empty_string_panics() {
        ToolCallId::new("");
    }

    #[test]
    #[should_panic(expected = "ToolName cannot be empty")]
    fn tool_name_empty_string_panics() {
        ToolName::new("");
    }

    #[test]
    fn tool_call_id_valid_non_empty() {
        let id = ToolCallId::new("toolu_01");
        assert_eq!(id.as_str(), "toolu_01");
    }

    #[test]
    fn tool_name_from_str() {
        let name: ToolName = "Bash".into();
        assert_eq!(name.as_str(), "Bash");
    }

    #[test]
    fn conversation_id_generate_unique() {
        let a = ConversationId::generate();
        let b = ConversationId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn tool_call_id_serializes_transparent() {
        let id = ToolCallId::new("toolu_01");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"toolu_01\"");
    }
}
