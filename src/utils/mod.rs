// src/utils/mod.rs
use log::info;

pub mod timing;

pub use timing::Timer;

/// Install the fern logger. Output goes to stderr so stdout stays free for JSON.
pub fn setup_logging(level: log::LevelFilter) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("rustls", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()?;
    info!("Logging initialized at {}.", level);
    Ok(())
}

/// Shorten a secret for log output: keeps the first four characters.
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        "<unset>".to_string()
    } else if secret.chars().count() > 4 {
        format!("{}...", secret.chars().take(4).collect::<String>())
    } else {
        "****".to_string()
    }
}

/// Truncate an upstream body for inclusion in error messages.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
