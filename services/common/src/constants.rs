//! Common constants used across the feed services
//!
//! Single source of truth for magic numbers

// Time constants
pub const MILLIS_PER_SEC: u64 = 1000;
pub const SECS_PER_DAY: i64 = 86_400;
/// Indian exchanges stamp local times in IST (UTC+05:30)
pub const IST_OFFSET_SECS: i64 = 19_800;

// Bus
/// Default per-topic channel capacity of the tick bus
pub const DEFAULT_BUS_CAPACITY: usize = 4096;
/// Separator between exchange, symbol and mode in a topic
pub const TOPIC_SEPARATOR: char = '_';
/// Wildcard character accepted in topic patterns
pub const TOPIC_WILDCARD: char = '*';
/// Size of the length prefix of an encoded bus frame
pub const FRAME_LENGTH_PREFIX: usize = 4;
/// Upper bound for a single encoded bus frame
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

// Depth
/// Depth levels used when a broker table has no better answer
pub const DEFAULT_DEPTH_LEVEL: u8 = 5;

// Reconnect backoff
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Uptime after which a silent session still clears the failure count
pub const STABLE_SESSION_MS: u64 = 30_000;

// Connection
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Bytes of a raw frame included in decode failure logs
pub const RAW_FRAME_LOG_LIMIT: usize = 64;
