//! Progress reporting for batch downloads.
//!
//! [`BatchProgress`] draws an `indicatif` bar when the `progress` feature is enabled and the
//! observatory asks for it (`show_progress`). Otherwise every call is a no-op, so the
//! fetch loop never has to check.
//!
//! The bar message shows the duration of the last range and a smoothed average, computed
//! with an exponential moving average (`ema ← α·dt + (1–α)·ema`).
use std::time::{Duration, Instant};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

/// Smoothing factor of the range duration average.
const EMA_ALPHA: f64 = 0.2;

/// Tracks how long each catalog range takes.
#[derive(Debug)]
struct RangeTimer {
    last: Instant,
    ema_ns: f64,
    count: u64,
}

impl RangeTimer {
    fn new() -> Self {
        RangeTimer {
            last: Instant::now(),
            ema_ns: 0.0,
            count: 0,
        }
    }

    fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let dt = now.duration_since(self.last);
        self.last = now;
        self.count += 1;

        let dt_ns = dt.as_nanos() as f64;
        self.ema_ns = if self.count == 1 {
            dt_ns
        } else {
            EMA_ALPHA * dt_ns + (1.0 - EMA_ALPHA) * self.ema_ns
        };
        dt
    }

    fn avg(&self) -> Duration {
        Duration::from_nanos(self.ema_ns as u64)
    }
}

/// Human readable duration: `"253µs"`, `"42ms"` or `"3.14s"`.
pub fn fmt_dur(d: Duration) -> String {
    let us = d.as_micros();
    if us < 1_000 {
        format!("{us}µs")
    } else if d.as_millis() < 1_000 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.2}s", d.as_secs_f32())
    }
}

pub struct BatchProgress {
    #[cfg(feature = "progress")]
    bar: Option<ProgressBar>,
    timer: RangeTimer,
}

impl BatchProgress {
    /// Start reporting on `total` catalog rows.
    ///
    /// Arguments
    /// -----------------
    /// * `total`: number of rows in the batch.
    /// * `visible`: draw the bar (ignored without the `progress` feature).
    pub fn new(total: usize, visible: bool) -> Self {
        #[cfg(feature = "progress")]
        let bar = visible.then(|| {
            let pb = ProgressBar::new((total as u64).max(1));
            pb.set_style(
                ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) | {per_sec} | ETA {eta_precise} | {msg}",
                )
                .expect("indicatif template"),
            );
            pb.enable_steady_tick(Duration::from_millis(200));
            pb
        });
        #[cfg(not(feature = "progress"))]
        let _ = (total, visible);

        BatchProgress {
            #[cfg(feature = "progress")]
            bar,
            timer: RangeTimer::new(),
        }
    }

    /// Record a finished range of `rows` catalog rows.
    ///
    /// Return
    /// ----------
    /// * The duration of that range.
    pub fn range_done(&mut self, rows: usize) -> Duration {
        let last = self.timer.tick();
        #[cfg(feature = "progress")]
        if let Some(pb) = &self.bar {
            pb.set_message(format!(
                "last: {}, avg: {}",
                fmt_dur(last),
                fmt_dur(self.timer.avg())
            ));
            pb.inc(rows as u64);
        }
        #[cfg(not(feature = "progress"))]
        let _ = rows;
        last
    }

    pub fn average(&self) -> Duration {
        self.timer.avg()
    }

    #[cfg(feature = "progress")]
    pub fn finish(self) {
        if let Some(pb) = self.bar {
            pb.finish_and_clear();
        }
    }

    #[cfg(not(feature = "progress"))]
    pub fn finish(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_dur() {
        assert_eq!(fmt_dur(Duration::from_micros(253)), "253µs");
        assert_eq!(fmt_dur(Duration::from_millis(42)), "42ms");
        assert_eq!(fmt_dur(Duration::from_millis(3140)), "3.14s");
    }

    #[test]
    fn test_hidden_progress_tracks_ranges() {
        let mut progress = BatchProgress::new(4, false);
        progress.range_done(2);
        progress.range_done(2);
        assert!(progress.average() <= Duration::from_secs(1));
        progress.finish();
    }
}
