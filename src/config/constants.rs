/// Output token ceiling applied when the general config does not set one
pub const MAX_OUTPUT_TOKENS: u32 = 1024;

pub const DEFAULT_PROFILE: &str = "default";

/// Directory history files live in, relative to the host's data dir
pub const HISTORY_DIR: &str = "history";

pub const LOG_FILE_PATH: &str = "/tmp/chatnote.log";

/// Version header required by the Anthropic API
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
