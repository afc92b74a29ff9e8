//! Decoding of forwarding rules
//!
//! A `ports` entry is either a bare integer, meaning the same port on both
//! sides, or a table with optional `local_port` and `remote_port` keys.
//! Other keys in a table are ignored. Any other TOML shape is rejected.

use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, Unexpected, Visitor};

use crate::types::ForwardRule;

const EXPECTING: &str = "a port number or a table with local_port/remote_port";

/// Key under which the toml deserializer hands datetimes to `visit_map`
const TOML_DATETIME_KEY: &str = "$__toml_private_datetime";

fn port_from_i64<E: de::Error>(value: i64) -> Result<u16, E> {
    u16::try_from(value)
        .map_err(|_| E::invalid_value(Unexpected::Signed(value), &"a port between 0 and 65535"))
}

fn port_from_u64<E: de::Error>(value: u64) -> Result<u16, E> {
    u16::try_from(value)
        .map_err(|_| E::invalid_value(Unexpected::Unsigned(value), &"a port between 0 and 65535"))
}

/// Read a port field of a rule table. Values that are not integers count
/// as port 0; integers must still fit in a port.
fn table_port<'de, A: MapAccess<'de>>(map: &mut A) -> Result<u16, A::Error> {
    match map.next_value::<toml::Value>()? {
        toml::Value::Integer(value) => port_from_i64(value),
        _ => Ok(0),
    }
}

struct ForwardRuleVisitor;

impl<'de> Visitor<'de> for ForwardRuleVisitor {
    type Value = ForwardRule;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(EXPECTING)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<ForwardRule, E> {
        port_from_i64(value).map(ForwardRule::same)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<ForwardRule, E> {
        port_from_u64(value).map(ForwardRule::same)
    }

    fn visit_map<A>(self, mut map: A) -> Result<ForwardRule, A::Error>
    where
        A: MapAccess<'de>,
    {
        // Omitted fields stay at port 0
        let mut rule = ForwardRule::default();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "local_port" => rule.local_port = table_port(&mut map)?,
                "remote_port" => rule.remote_port = table_port(&mut map)?,
                TOML_DATETIME_KEY => {
                    return Err(de::Error::invalid_type(Unexpected::Other("datetime"), &self));
                }
                _ => {
                    map.next_value::<de::IgnoredAny>()?;
                }
            }
        }

        Ok(rule)
    }
}

impl<'de> Deserialize<'de> for ForwardRule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ForwardRuleVisitor)
    }
}
