use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for the CLI.
///
/// The backend this adapter talks to uses Python-style level names, and the
/// config follows suit: "WARNING" maps to WARN, "CRITICAL" to ERROR, and
/// "DISABLED" installs no subscriber at all. Anything unparseable falls back
/// to INFO.
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();
    if level == "DISABLED" {
        return;
    }

    let filter = EnvFilter::try_new(map_level(&level))
        .unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn map_level(level: &str) -> &str {
    match level {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_style_levels_map_to_tracing_levels() {
        assert_eq!(map_level("WARNING"), "WARN");
        assert_eq!(map_level("CRITICAL"), "ERROR");
        assert_eq!(map_level("DEBUG"), "DEBUG");
    }
}
