/// Initialize env_logger once per binary. Logs go to stderr so `rates` can
/// keep stdout for JSON.
pub fn init_logger(default_filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .try_init();
}
