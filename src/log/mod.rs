use fs_err as fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// Installs the stderr subscriber. `RUST_LOG` wins over `verbosity`
/// (0 = warn, 1 = info, 2+ = debug).
pub fn init(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init();
}

pub fn responses_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("responses")
}

/// Writes a raw provider reply to `<dir>/<uuid>.txt` for later inspection.
pub fn save_raw_response(dir: &Path, raw: &str) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let p = dir.join(format!("{}.txt", Uuid::new_v4()));
    fs::write(&p, raw)?;
    Ok(p)
}

/// Shortens text for log fields, respecting char boundaries.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_responses_land_in_their_own_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = responses_dir(dir.path());
        let a = save_raw_response(&target, "not json").unwrap();
        let b = save_raw_response(&target, "also not json").unwrap();
        assert_ne!(a, b);
        assert_eq!(fs::read_to_string(&a).unwrap(), "not json");
    }

    #[test]
    fn preview_truncates_on_chars() {
        assert_eq!(preview("héllo", 2), "hé…");
        assert_eq!(preview("hi", 5), "hi");
    }
}
