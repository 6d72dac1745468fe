//! Process logging: one fern dispatcher writing every record to stdout and to
//! a per-run file `server_livechan_<timestamp>.log` under the log directory.
//! Earlier run files are pruned at startup; other files in the directory are
//! left alone.

use anyhow::Result;
use chrono::{DateTime, Local};
use log::LevelFilter;
use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const LOG_PREFIX: &str = "server_livechan_";

/// Installs the global logger. Keeps at most `keep` run files, the new one
/// included, and returns the path of the new one.
pub fn setup_logging(log_dir: &Path, log_level: &str, keep: usize) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)?;
    let pruned = prune_logs(log_dir, keep.saturating_sub(1))?;

    let log_path = log_dir.join(log_file_name(Local::now()));
    dispatch(parse_level(log_level), &log_path)?.apply()?;

    log::info!("Logging to {} ({} old run logs removed)", log_path.display(), pruned);
    Ok(log_path)
}

fn log_file_name(at: DateTime<Local>) -> String {
    format!("{}{}.log", LOG_PREFIX, at.format("%Y-%m-%d_%H-%M-%S"))
}

fn dispatch(level: LevelFilter, log_path: &Path) -> Result<fern::Dispatch> {
    Ok(fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                Local::now().format("[%Y-%m-%d %H:%M:%S%.3f]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        // Connection pool chatter drowns the poller at debug level.
        .level_for("hyper_util", LevelFilter::Info)
        .level_for("reqwest", LevelFilter::Info)
        .level_for("tungstenite", LevelFilter::Info)
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?))
}

/// `trace|debug|info|warn|error|off`, any case. Anything else is `info`.
fn parse_level(log_level: &str) -> LevelFilter {
    log_level.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Deletes all but the `keep` newest run logs. Returns how many were removed.
fn prune_logs(log_dir: &Path, keep: usize) -> Result<usize> {
    let mut runs: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(LOG_PREFIX) && name.ends_with(".log")
        })
        .map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect();
    runs.sort_by_key(|(modified, _)| Reverse(*modified));

    let mut removed = 0;
    for (_, path) in runs.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            // The logger is not installed yet.
            Err(e) => eprintln!("Failed to delete old log file {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use log::{Level, Record};
    use std::fs::File;
    use std::time::Duration;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn prunes_only_old_run_logs() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        for (name, age) in [
            ("server_livechan_1.log", 600),
            ("server_livechan_2.log", 300),
            ("server_livechan_3.log", 10),
            ("other_service.log", 900),
        ] {
            let file = File::create(dir.path().join(name)).unwrap();
            file.set_modified(now - Duration::from_secs(age)).unwrap();
        }
        File::create(dir.path().join("server_livechan.conf")).unwrap();

        assert_eq!(prune_logs(dir.path(), 2).unwrap(), 1);
        assert_eq!(
            names(dir.path()),
            vec!["other_service.log", "server_livechan.conf", "server_livechan_2.log", "server_livechan_3.log"]
        );

        assert_eq!(prune_logs(dir.path(), 0).unwrap(), 2);
        assert_eq!(names(dir.path()), vec!["other_service.log", "server_livechan.conf"]);
    }

    #[test]
    fn run_log_names_sort_by_start_time() {
        let at = Local.with_ymd_and_hms(2024, 1, 9, 7, 5, 1).unwrap();
        assert_eq!(log_file_name(at), "server_livechan_2024-01-09_07-05-01.log");
    }

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("TRACE"), LevelFilter::Trace);
        assert_eq!(parse_level(" warn "), LevelFilter::Warn);
        assert_eq!(parse_level("off"), LevelFilter::Off);
        assert_eq!(parse_level("fatal"), LevelFilter::Info);
    }

    #[test]
    fn records_reach_the_file_with_http_noise_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_livechan_test.log");
        let (_, logger) = dispatch(LevelFilter::Debug, &path).unwrap().into_log();

        logger.log(
            &Record::builder()
                .args(format_args!("Fetching board /g/..."))
                .level(Level::Debug)
                .target("lib_livechan::ingestors::board_polling")
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("reusing idle connection"))
                .level(Level::Debug)
                .target("hyper_util::client::legacy::pool")
                .build(),
        );
        logger.flush();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("[lib_livechan::ingestors::board_polling][DEBUG] Fetching board /g/..."));
        assert!(!written.contains("reusing idle connection"));
    }
}
