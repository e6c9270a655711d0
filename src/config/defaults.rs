use super::constants::*;

pub(crate) fn max_tokens() -> Option<u32> {
    Some(MAX_OUTPUT_TOKENS)
}

pub(crate) fn profile() -> String {
    DEFAULT_PROFILE.to_string()
}

pub(crate) fn history_dir() -> String {
    HISTORY_DIR.to_string()
}

pub(crate) fn log_level() -> Option<String> {
    Some("info".to_string())
}

pub(crate) fn log_file_path() -> String {
    LOG_FILE_PATH.to_string()
}

pub(crate) fn stream() -> bool {
    true
}
