/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Declares a snowflake-style identifier carried as a string on the wire.
macro_rules! snowflake_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub String);

            impl From<String> for $name {
                fn from(s: String) -> Self {
                    Self(s)
                }
            }

            impl From<&str> for $name {
                fn from(s: &str) -> Self {
                    Self(s.to_owned())
                }
            }

            impl From<u64> for $name {
                fn from(id: u64) -> Self {
                    Self(id.to_string())
                }
            }

            impl std::ops::Deref for $name {
                type Target = str;
                fn deref(&self) -> &Self::Target {
                    &self.0
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )*
    };
}

snowflake_id! {
    /// Guild (server) the voice session belongs to.
    GuildId,
    /// Voice channel inside a guild.
    ChannelId,
    UserId,
}

/// Process-unique handle for one `VoiceConnection`, used by players to key
/// their subscriber bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_their_raw_value() {
        assert_eq!(GuildId::from(42u64).to_string(), "42");
        assert_eq!(&*ChannelId::from("9001"), "9001");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&GuildId::from("123")).unwrap();
        assert_eq!(json, "\"123\"");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }
}
