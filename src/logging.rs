//! Logging setup (ambient stack, matching the teacher's `log` + `env_logger`
//! pairing). Bridge callbacks log at `debug!`, session lifecycle and CLI
//! actions at `info!`, crypto/IO failures at `warn!`/`error!`.

pub fn init(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}
