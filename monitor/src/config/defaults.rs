pub fn poll_time_seconds() -> u32 {
    2
}
pub fn keep_alive_seconds() -> u32 {
    120
}
pub fn debounce_window_seconds() -> u32 {
    30
}
pub fn send_timeout_seconds() -> u32 {
    30
}
pub fn send_attempts() -> u32 {
    3
}
pub fn retry_backoff_millis() -> u64 {
    500
}
pub fn dependency_check_hours() -> u32 {
    24
}
pub fn releases_url() -> String {
    "https://api.github.com/repos/wakatime/wakatime-cli/releases/latest".to_string()
}
pub fn download_url() -> String {
    "https://github.com/wakatime/wakatime-cli/releases/download".to_string()
}
