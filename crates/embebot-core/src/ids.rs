use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discord snowflakes travel as decimal strings on the wire; keep them opaque
/// so a channel id can never be passed where a message id is expected.
macro_rules! snowflake_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

snowflake_id!(GuildId);
snowflake_id!(ChannelId);
snowflake_id!(MessageId);
snowflake_id!(UserId);
snowflake_id!(InteractionId);
snowflake_id!(ApplicationId);
