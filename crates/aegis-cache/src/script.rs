//! Server-side update script.
//!
//! Writes all entry fields and applies (or clears) the expiry in one
//! indivisible step, so a reader never sees fields without their TTL.

use crate::entry::{ENTRY_FIELDS, NOT_PRESENT, TTL_SCRIPT_ARG};
use std::fmt::Write as _;

/// The atomic set script, rendered once from the entry field table.
pub struct AtomicSetScript {
    source: String,
    script: redis::Script,
}

impl AtomicSetScript {
    pub fn new() -> Self {
        let source = render();
        let script = redis::Script::new(&source);
        Self { source, script }
    }

    /// Lua source of the script.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// SHA1 used for `EVALSHA`.
    pub fn hash(&self) -> &str {
        self.script.get_hash()
    }

    /// The invocable script.
    pub fn script(&self) -> &redis::Script {
        &self.script
    }
}

impl Default for AtomicSetScript {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AtomicSetScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicSetScript")
            .field("hash", &self.hash())
            .finish_non_exhaustive()
    }
}

fn render() -> String {
    let mut lua = String::from("redis.call('HSET', KEYS[1]");
    for field in ENTRY_FIELDS {
        // Writing to a String cannot fail.
        let _ = write!(lua, ", '{}', ARGV[{}]", field.name, field.script_arg);
    }
    lua.push_str(")\n");
    let _ = write!(
        lua,
        "if ARGV[{ttl}] ~= '{sentinel}' then\n  redis.call('EXPIRE', KEYS[1], ARGV[{ttl}])\nelse\n  redis.call('PERSIST', KEYS[1])\nend\nreturn 1",
        ttl = TTL_SCRIPT_ARG,
        sentinel = NOT_PRESENT,
    );
    lua
}
