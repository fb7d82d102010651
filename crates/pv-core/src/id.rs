//! Snowflake identifier types.
//!
//! Discord sends ids as decimal strings. Each kind of id gets its own
//! newtype so a channel id can never be passed where a user id is expected.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

pub(crate) struct DecimalU64Visitor;

impl Visitor<'_> for DecimalU64Visitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a u64 as a decimal string or integer")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
        Ok(value)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
        u64::try_from(value).map_err(|_| E::custom("negative value"))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
        value.parse().map_err(E::custom)
    }
}

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(DecimalU64Visitor).map(Self)
            }
        }
    };
}

snowflake_id!(
    /// A guild (server).
    GuildId
);
snowflake_id!(
    /// A text, voice or category channel.
    ChannelId
);
snowflake_id!(
    /// A user or guild member.
    UserId
);
snowflake_id!(
    /// A guild role.
    RoleId
);
snowflake_id!(
    /// An id whose kind is given by a sibling field, as in permission overwrites.
    Snowflake
);

impl GuildId {
    /// The `@everyone` role shares its id with the guild.
    pub const fn everyone_role(self) -> RoleId {
        RoleId(self.0)
    }
}
