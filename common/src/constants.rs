pub const DEFAULT_CONFIG_PATH: &str = "/etc/authgated/config.toml";
pub const DEFAULT_SOCK_PATH: &str = "/var/run/authgated/sock";
pub const DEFAULT_BROKER_DIR: &str = "/etc/authgated/brokers.d";

// Seconds. The authorize timeout is generous on purpose: brokers may wait
// on external identity providers or user interaction.
pub const DEFAULT_CONN_TIMEOUT: u64 = 2;
pub const DEFAULT_AUTHORIZE_TIMEOUT: u64 = 120;

pub const MAX_PREAUTH_USERS: usize = 10_000;

// Placeholder fields of a provisional user record. Only the uid carries
// meaning before authentication completes.
pub const PREAUTH_NAME_PREFIX: &str = "authgate-tmp-";
pub const PREAUTH_HOMEDIR: &str = "/nonexistent";
pub const PREAUTH_SHELL: &str = "/usr/sbin/nologin";

// Identifier range handed to the default id source. Kept far above any
// range a system allocator would use for local accounts.
pub const PREAUTH_UID_MIN: u32 = 1_000_000_000;
pub const PREAUTH_UID_MAX: u32 = 1_999_999_999;
