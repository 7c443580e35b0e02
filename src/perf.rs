use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;

/// JSON-lines timing log. Cloning shares the same file.
///
/// When the last clone drops, an aggregated `<stem>_hot.log` is written next to the log with
/// span totals sorted by time spent.
#[derive(Clone)]
pub struct PerfLogger {
    inner: Arc<Mutex<PerfState>>,
}

struct PerfState {
    writer: BufWriter<File>,
    path: PathBuf,
    span_totals: HashMap<String, f64>,
    span_counts: HashMap<String, u64>,
    count_totals: HashMap<String, u64>,
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(PerfState {
                writer: BufWriter::new(file),
                path,
                span_totals: HashMap::new(),
                span_counts: HashMap::new(),
                count_totals: HashMap::new(),
            })),
        })
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().ok().map(|state| state.path.clone())
    }

    pub fn log_span_ms(&self, name: &str, page_index: Option<usize>, ms: f64) {
        let line = json!({
            "type": "perf.span",
            "name": name,
            "page_index": page_index,
            "unit": "ms",
            "ms": round3(ms),
        });
        if let Ok(mut state) = self.inner.lock() {
            *state.span_totals.entry(name.to_string()).or_insert(0.0) += ms;
            let entry = state.span_counts.entry(name.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn log_counts(&self, name: &str, page_index: Option<usize>, counts: &[(&str, u64)]) {
        let map: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(key, value)| (key.to_string(), json!(value)))
            .collect();
        let line = json!({
            "type": "perf.counts",
            "name": name,
            "page_index": page_index,
            "counts": map,
        });
        if let Ok(mut state) = self.inner.lock() {
            for (key, value) in counts {
                let entry = state.count_totals.entry(format!("{name}.{key}")).or_insert(0);
                *entry = entry.saturating_add(*value);
            }
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

/// Times one span; logs on [`SpanTimer::finish`].
pub(crate) struct SpanTimer<'a> {
    perf: Option<&'a PerfLogger>,
    name: &'static str,
    page_index: Option<usize>,
    started: Instant,
}

impl<'a> SpanTimer<'a> {
    pub(crate) fn start(
        perf: Option<&'a PerfLogger>,
        name: &'static str,
        page_index: Option<usize>,
    ) -> Self {
        Self {
            perf,
            name,
            page_index,
            started: Instant::now(),
        }
    }

    pub(crate) fn finish(self) -> f64 {
        let ms = self.started.elapsed().as_secs_f64() * 1000.0;
        if let Some(perf) = self.perf {
            perf.log_span_ms(self.name, self.page_index, ms);
        }
        ms
    }
}

fn round3(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}

impl Drop for PerfState {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let hot_path = hot_path_for(&self.path);
        let Ok(file) = File::create(&hot_path) else {
            return;
        };
        let mut writer = BufWriter::new(file);

        let mut spans: Vec<(&String, &f64)> = self.span_totals.iter().collect();
        spans.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (rank, (name, ms)) in spans.into_iter().take(100).enumerate() {
            let count = *self.span_counts.get(name).unwrap_or(&1);
            let avg = if count == 0 { 0.0 } else { ms / count as f64 };
            let line = json!({
                "type": "perf.hot.span",
                "rank": rank + 1,
                "name": name,
                "unit": "ms",
                "agg": "sum",
                "ms": round3(*ms),
                "count": count,
                "avg_ms": round3(avg),
            });
            let _ = writeln!(writer, "{line}");
        }

        let mut counts: Vec<(&String, &u64)> = self.count_totals.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        for (rank, (name, value)) in counts.into_iter().take(100).enumerate() {
            let line = json!({
                "type": "perf.hot.count",
                "rank": rank + 1,
                "name": name,
                "value": value,
            });
            let _ = writeln!(writer, "{line}");
        }
    }
}

fn hot_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("fieldplate_perf.log");
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name);
    path.with_file_name(format!("{stem}_hot.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fieldplate_{}_{}.log", name, std::process::id()))
    }

    #[test]
    fn spans_are_written_as_json_lines_and_summarized() {
        let path = temp_log("perf_spans");
        let perf = PerfLogger::new(&path).expect("create");
        perf.log_span_ms("rasterize.page", Some(0), 2.5);
        perf.log_span_ms("rasterize.page", Some(1), 1.5);
        perf.log_counts("export", None, &[("pages", 2)]);
        drop(perf);

        let text = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["name"], "rasterize.page");
        assert_eq!(lines[1]["page_index"], 1);
        assert_eq!(lines[2]["counts"]["pages"], 2);

        let hot = hot_path_for(&path);
        let hot_text = std::fs::read_to_string(&hot).expect("hot");
        let first: serde_json::Value =
            serde_json::from_str(hot_text.lines().next().expect("line")).expect("json");
        assert_eq!(first["count"], 2);
        assert_eq!(first["ms"], 4.0);

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&hot);
    }

    #[test]
    fn hot_path_keeps_directory_and_swaps_extension() {
        let hot = hot_path_for(Path::new("/tmp/run/perf.jsonl"));
        assert_eq!(hot, PathBuf::from("/tmp/run/perf_hot.log"));
    }

    #[test]
    fn span_timer_without_logger_still_measures() {
        let timer = SpanTimer::start(None, "noop", None);
        assert!(timer.finish() >= 0.0);
    }
}
