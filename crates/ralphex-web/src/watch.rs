use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ralphex_core::events::{EventBus, EventKind};
use ralphex_core::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_SCAN_DEPTH: usize = 4;

/// Multiplexes foreign progress files into the event bus. Files present at
/// startup are tailed from their current end; files appearing later stream
/// from the beginning. Each event carries a session id derived from the
/// file path.
pub fn spawn_watcher(dirs: Vec<PathBuf>, bus: EventBus, cancel: CancelToken) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut tails: HashMap<PathBuf, Tail> = HashMap::new();

        // baseline: existing files are tailed, not replayed
        for path in scan_progress_files(&dirs) {
            let len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            tails.insert(
                path.clone(),
                Tail {
                    offset: len,
                    pending: String::new(),
                },
            );
        }

        loop {
            if cancel.sleep(POLL_INTERVAL) {
                return;
            }

            for path in scan_progress_files(&dirs) {
                let session = session_id(&path);
                let tail = tails.entry(path.clone()).or_insert_with(|| {
                    bus.publish_for_session(
                        EventKind::Section,
                        None,
                        format!("watching {}", path.display()),
                        Some(session.clone()),
                    );
                    Tail {
                        offset: 0,
                        pending: String::new(),
                    }
                });

                for line in tail.read_appended(&path) {
                    bus.publish_for_session(EventKind::Log, None, line, Some(session.clone()));
                }
            }
        }
    })
}

struct Tail {
    offset: u64,
    /// Incomplete trailing line carried to the next poll.
    pending: String,
}

impl Tail {
    fn read_appended(&mut self, path: &Path) -> Vec<String> {
        let Ok(mut file) = fs::File::open(path) else {
            return Vec::new();
        };
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        if len < self.offset {
            // truncated (e.g. log rotation): start over
            self.offset = 0;
            self.pending.clear();
        }
        if len == self.offset {
            return Vec::new();
        }
        if file.seek(SeekFrom::Start(self.offset)).is_err() {
            return Vec::new();
        }

        let mut buf = String::new();
        if file.read_to_string(&mut buf).is_err() {
            return Vec::new();
        }
        self.offset = len;

        let mut combined = std::mem::take(&mut self.pending);
        combined.push_str(&buf);

        let mut lines: Vec<String> = Vec::new();
        let mut rest = combined.as_str();
        while let Some(pos) = rest.find('\n') {
            lines.push(rest[..pos].trim_end_matches('\r').to_string());
            rest = &rest[pos + 1..];
        }
        self.pending = rest.to_string();
        lines
    }
}

fn is_progress_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with("progress-") && name.ends_with(".txt"))
}

fn scan_progress_files(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in dirs {
        collect(dir, 0, &mut found);
    }
    found.sort();
    found
}

fn collect(dir: &Path, depth: usize, found: &mut Vec<PathBuf>) {
    if depth > MAX_SCAN_DEPTH {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(&path, depth + 1, found);
        } else if is_progress_file(&path) {
            found.push(path);
        }
    }
}

/// Stable session identifier for a progress file.
pub fn session_id(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

    use ralphex_core::events::{Event, EventBus, EventStream};
    use ralphex_core::CancelToken;

    use super::{is_progress_file, session_id, spawn_watcher};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("ralphex-watch-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn wait_for_events(stream: &EventStream, count: usize) -> Vec<Event> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while events.len() < count && Instant::now() < deadline {
            if let Some(event) = stream.recv_timeout(Duration::from_millis(200)) {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn progress_file_name_pattern() {
        assert!(is_progress_file(Path::new("/x/progress-20240101-1200.txt")));
        assert!(!is_progress_file(Path::new("/x/notes.txt")));
        assert!(!is_progress_file(Path::new("/x/progress-123.log")));
    }

    #[test]
    fn session_id_is_the_file_stem() {
        assert_eq!(
            session_id(Path::new("/a/b/progress-20240101-1200.txt")),
            "progress-20240101-1200"
        );
    }

    #[test]
    fn new_files_stream_from_the_beginning_with_session_ids() {
        let dir_a = unique_temp_dir("a");
        let dir_b = unique_temp_dir("b");
        let bus = EventBus::new();
        let stream = bus.subscribe();
        let cancel = CancelToken::new();

        let handle = spawn_watcher(
            vec![dir_a.clone(), dir_b.clone()],
            bus.clone(),
            cancel.clone(),
        );

        fs::write(dir_a.join("progress-run1.txt"), "line a1\nline a2\n").expect("write a");
        fs::create_dir_all(dir_b.join("nested")).expect("nested dir");
        fs::write(dir_b.join("nested/progress-run2.txt"), "line b1\n").expect("write b");

        // 2 section markers + 3 log lines
        let events = wait_for_events(&stream, 5);
        cancel.cancel();
        handle.join().expect("join watcher");

        let logs: Vec<&Event> = events
            .iter()
            .filter(|e| e.kind == ralphex_core::events::EventKind::Log)
            .collect();
        assert_eq!(logs.len(), 3);
        assert!(logs
            .iter()
            .any(|e| e.payload == "line a1" && e.session.as_deref() == Some("progress-run1")));
        assert!(logs
            .iter()
            .any(|e| e.payload == "line b1" && e.session.as_deref() == Some("progress-run2")));

        let _ = fs::remove_dir_all(&dir_a);
        let _ = fs::remove_dir_all(&dir_b);
    }

    #[test]
    fn preexisting_content_is_tailed_not_replayed() {
        let dir = unique_temp_dir("tail");
        let path = dir.join("progress-old.txt");
        fs::write(&path, "history line\n").expect("write history");

        let bus = EventBus::new();
        let stream = bus.subscribe();
        let cancel = CancelToken::new();
        let handle = spawn_watcher(vec![dir.clone()], bus.clone(), cancel.clone());

        // give the watcher a poll cycle, then append
        std::thread::sleep(Duration::from_millis(700));
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open for append");
        writeln!(file, "fresh line").expect("append");
        drop(file);

        let events = wait_for_events(&stream, 1);
        cancel.cancel();
        handle.join().expect("join watcher");

        assert!(events.iter().any(|e| e.payload == "fresh line"));
        assert!(!events.iter().any(|e| e.payload == "history line"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn incomplete_trailing_lines_wait_for_their_newline() {
        let dir = unique_temp_dir("partial");
        let bus = EventBus::new();
        let stream = bus.subscribe();
        let cancel = CancelToken::new();
        let handle = spawn_watcher(vec![dir.clone()], bus.clone(), cancel.clone());

        let path = dir.join("progress-partial.txt");
        fs::write(&path, "complete\nincomp").expect("write partial");

        // section marker + one complete line only
        let events = wait_for_events(&stream, 2);
        assert!(events.iter().any(|e| e.payload == "complete"));
        assert!(!events.iter().any(|e| e.payload.starts_with("incomp")));

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open for append");
        write!(file, "lete\n").expect("finish line");
        drop(file);

        let rest = wait_for_events(&stream, 1);
        cancel.cancel();
        handle.join().expect("join watcher");

        assert!(rest.iter().any(|e| e.payload == "incomplete"));

        let _ = fs::remove_dir_all(&dir);
    }
}
