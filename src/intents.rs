//! Gateway intents bitflags.
//!
//! Intents are requested at IDENTIFY time and gate which dispatch event
//! categories the gateway will send. This crate only needs the bitmask
//! itself (to build the IDENTIFY payload and to classify a 4014
//! DISALLOWED_INTENTS close) — interpreting *which* events arrive is the
//! caller's concern, not this crate's.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Bitflags of gateway intents, requested at IDENTIFY time.
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct Intents: u64 {
        /// Guild create/update/delete/role/channel/etc. events.
        const GUILDS = 1 << 0;
        /// Guild member add/update/remove events.
        const GUILD_MEMBERS = 1 << 1;
        /// Guild ban add/remove events.
        const GUILD_BANS = 1 << 2;
        /// Guild emoji/sticker update events.
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        /// Guild integration update events.
        const GUILD_INTEGRATIONS = 1 << 4;
        /// Guild webhook update events.
        const GUILD_WEBHOOKS = 1 << 5;
        /// Guild invite create/delete events.
        const GUILD_INVITES = 1 << 6;
        /// Guild voice state update events.
        const GUILD_VOICE_STATES = 1 << 7;
        /// Guild presence update events.
        const GUILD_PRESENCES = 1 << 8;
        /// Guild message create/update/delete events.
        const GUILD_MESSAGES = 1 << 9;
        /// Guild message reaction add/remove events.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// Guild typing start events.
        const GUILD_MESSAGE_TYPING = 1 << 11;
        /// Direct message create/update/delete events.
        const DIRECT_MESSAGES = 1 << 12;
        /// Direct message reaction add/remove events.
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// Direct message typing start events.
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        /// Message content on events that otherwise omit it.
        const MESSAGE_CONTENT = 1 << 15;
        /// Guild scheduled event create/update/delete events.
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_serialize_as_a_single_integer() {
        let intents = Intents::GUILDS | Intents::GUILD_MESSAGES;
        let value = serde_json::to_value(intents).unwrap();
        assert_eq!(value, serde_json::json!(intents.bits()));
    }

    #[test]
    fn default_intents_are_empty() {
        assert!(Intents::default().is_empty());
    }
}
