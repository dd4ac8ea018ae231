use std::time::Instant;

use tracing::info;

/// Per-file container counter, reported through the log.
pub struct ContainerProgress {
    label: String,
    total: usize,
    done: usize,
    t0: Instant,
}

impl ContainerProgress {
    pub fn new(label: impl Into<String>, total: usize) -> Self {
        Self {
            label: label.into(),
            total,
            done: 0,
            t0: Instant::now(),
        }
    }

    pub fn tick(&mut self) {
        self.done += 1;
        let total = self.total.max(1);
        let current = self.done.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        let elapsed = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        info!(
            file = %self.label,
            "[{elapsed}] containers {current}/{total} ({pct:5.1}%)"
        );
    }

    pub fn finish(&self) {
        let elapsed = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        info!(file = %self.label, done = self.done, total = self.total, "[{elapsed}] translated");
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_elapsed_time() {
        assert_eq!(fmt_elapsed(5.4), "00:05");
        assert_eq!(fmt_elapsed(125.0), "02:05");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
        assert_eq!(fmt_elapsed(-1.0), "00:00");
    }

    #[test]
    fn counts_ticks() {
        let mut p = ContainerProgress::new("Map001.json", 2);
        p.tick();
        p.tick();
        assert_eq!(p.done, 2);
    }
}
