// src/metronome/mod.rs

pub mod click;

use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;

/// Tempo and accent configuration. Accent placement is explicit: beat 0 of
/// every `beats_per_measure`-long measure is the downbeat; a value of 0 or 1
/// disables accents entirely.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MetronomeConfig {
    pub bpm: f64,
    pub beats_per_measure: u32,
}

impl MetronomeConfig {
    pub fn new(bpm: f64, beats_per_measure: u32) -> Self {
        Self {
            bpm: bpm.clamp(MIN_BPM, MAX_BPM),
            beats_per_measure,
        }
    }

    /// Seconds between ticks (e.g. 120 BPM -> 0.5s)
    pub fn interval_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_seconds())
    }
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            beats_per_measure: 4,
        }
    }
}

/// One scheduler tick, handed to the caller-supplied side effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    pub beat_in_measure: u32,
    pub accented: bool,
}

enum Cmd {
    SetBpm(f64),
    Stop,
}

/// Periodic tick driver. A worker thread schedules against the monotonic
/// clock (`Instant` deadlines, drift-free `next += interval`); the first tick
/// fires immediately on start. A tempo change invalidates the current
/// deadline: the next tick lands one new interval after the change, not after
/// the last natural tick. Accepted simplification, not drift correction.
pub struct MetronomeScheduler {
    config: MetronomeConfig,
    tx: Option<Sender<Cmd>>,
    handle: Option<JoinHandle<()>>,
    clock: RunClock,
}

impl MetronomeScheduler {
    pub fn new(config: MetronomeConfig) -> Self {
        Self {
            config,
            tx: None,
            handle: None,
            clock: RunClock::new(),
        }
    }

    /// Start ticking. `on_tick` runs on the worker thread for every beat
    /// (sound + visual pulse belong to the caller). No-op while running.
    pub fn start<F>(&mut self, mut on_tick: F)
    where
        F: FnMut(Tick) + Send + 'static,
    {
        if self.tx.is_some() {
            return;
        }

        let (tx, rx) = channel();
        let config = self.config;

        let handle = thread::spawn(move || {
            let mut interval = config.interval();
            let mut beat: u32 = 0;
            let mut next = Instant::now();

            loop {
                let wait = next.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(Cmd::SetBpm(bpm)) => {
                        // Fresh timer from the change instant.
                        interval = MetronomeConfig::new(bpm, config.beats_per_measure).interval();
                        next = Instant::now() + interval;
                    }
                    Ok(Cmd::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let accented = config.beats_per_measure > 1 && beat == 0;
                        on_tick(Tick {
                            beat_in_measure: beat,
                            accented,
                        });
                        beat = if config.beats_per_measure > 0 {
                            (beat + 1) % config.beats_per_measure
                        } else {
                            0
                        };
                        next += interval;
                    }
                }
            }
        });

        self.tx = Some(tx);
        self.handle = Some(handle);
        self.clock.resume();
    }

    /// Cancel the timer synchronously and reset the beat position. The run
    /// clock pauses; accumulated time survives for the next start.
    pub fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Cmd::Stop);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.clock.pause();
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.config.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        if let Some(tx) = &self.tx {
            let _ = tx.send(Cmd::SetBpm(self.config.bpm));
        }
    }

    pub fn bpm(&self) -> f64 {
        self.config.bpm
    }

    pub fn interval_seconds(&self) -> f64 {
        self.config.interval_seconds()
    }

    pub fn is_running(&self) -> bool {
        self.tx.is_some()
    }

    /// Total running time across pauses.
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }
}

impl Drop for MetronomeScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pause-aware elapsed time: an accumulator plus a monotonic since-resume
/// marker. Resuming references the resume instant; elapsed time is never
/// reconstructed by diffing wall-clock timestamps after the fact.
pub struct RunClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl RunClock {
    pub fn new() -> Self {
        Self {
            accumulated: Duration::ZERO,
            running_since: None,
        }
    }

    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + since.elapsed(),
            None => self.accumulated,
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = None;
    }
}

impl Default for RunClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collect_ticks(scheduler: &mut MetronomeScheduler) -> Arc<Mutex<Vec<(Instant, Tick)>>> {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        scheduler.start(move |tick| {
            sink.lock().unwrap().push((Instant::now(), tick));
        });
        ticks
    }

    #[test]
    fn first_tick_fires_immediately() {
        let mut scheduler = MetronomeScheduler::new(MetronomeConfig::new(60.0, 4));
        let started = Instant::now();
        let ticks = collect_ticks(&mut scheduler);
        thread::sleep(Duration::from_millis(200));
        scheduler.stop();

        let ticks = ticks.lock().unwrap();
        assert_eq!(ticks.len(), 1);
        assert!(ticks[0].0.duration_since(started) < Duration::from_millis(150));
    }

    #[test]
    fn ticks_are_spaced_by_the_interval() {
        let mut scheduler = MetronomeScheduler::new(MetronomeConfig::new(240.0, 4));
        let ticks = collect_ticks(&mut scheduler);
        thread::sleep(Duration::from_millis(900));
        scheduler.stop();

        let ticks = ticks.lock().unwrap();
        // 0.25s interval: immediate tick plus three or four more.
        assert!(ticks.len() >= 3, "got {} ticks", ticks.len());
        for pair in ticks.windows(2) {
            let gap = pair[1].0.duration_since(pair[0].0);
            assert!(
                gap > Duration::from_millis(150) && gap < Duration::from_millis(400),
                "tick gap was {gap:?}"
            );
        }
    }

    #[test]
    fn tempo_change_reschedules_without_burst() {
        let mut scheduler = MetronomeScheduler::new(MetronomeConfig::new(120.0, 4));
        let ticks = collect_ticks(&mut scheduler);
        thread::sleep(Duration::from_millis(700));

        let change = Instant::now();
        scheduler.set_bpm(60.0);
        thread::sleep(Duration::from_millis(1400));
        scheduler.stop();

        let ticks = ticks.lock().unwrap();
        let after: Vec<_> = ticks.iter().filter(|(at, _)| *at > change).collect();
        assert!(!after.is_empty());
        // Next tick comes one full new interval after the change, so nothing
        // lands in the first ~0.8s and no burst of catch-up ticks appears.
        let first_gap = after[0].0.duration_since(change);
        assert!(
            first_gap > Duration::from_millis(800) && first_gap < Duration::from_millis(1300),
            "first tick after change at {first_gap:?}"
        );
        assert!(after.len() <= 2, "burst after tempo change: {}", after.len());
    }

    #[test]
    fn accents_follow_the_measure() {
        let mut scheduler = MetronomeScheduler::new(MetronomeConfig::new(240.0, 3));
        let ticks = collect_ticks(&mut scheduler);
        thread::sleep(Duration::from_millis(1200));
        scheduler.stop();

        let ticks = ticks.lock().unwrap();
        assert!(ticks.len() >= 4);
        for (i, (_, tick)) in ticks.iter().enumerate() {
            let beat = (i as u32) % 3;
            assert_eq!(tick.beat_in_measure, beat);
            assert_eq!(tick.accented, beat == 0);
        }
    }

    #[test]
    fn accents_disabled_below_two_beats() {
        let mut scheduler = MetronomeScheduler::new(MetronomeConfig::new(240.0, 1));
        let ticks = collect_ticks(&mut scheduler);
        thread::sleep(Duration::from_millis(600));
        scheduler.stop();

        let ticks = ticks.lock().unwrap();
        assert!(!ticks.is_empty());
        assert!(ticks.iter().all(|(_, t)| !t.accented));
    }

    #[test]
    fn restart_resets_the_beat_position() {
        let mut scheduler = MetronomeScheduler::new(MetronomeConfig::new(240.0, 4));
        let ticks = collect_ticks(&mut scheduler);
        thread::sleep(Duration::from_millis(400));
        scheduler.stop();
        assert!(!scheduler.is_running());

        let ticks2 = collect_ticks(&mut scheduler);
        thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        assert!(ticks.lock().unwrap().len() >= 2);
        let ticks2 = ticks2.lock().unwrap();
        assert_eq!(ticks2[0].1.beat_in_measure, 0);
        assert!(ticks2[0].1.accented);
    }

    #[test]
    fn bpm_is_clamped() {
        let mut scheduler = MetronomeScheduler::new(MetronomeConfig::new(999.0, 4));
        assert_eq!(scheduler.bpm(), MAX_BPM);
        scheduler.set_bpm(1.0);
        assert_eq!(scheduler.bpm(), MIN_BPM);
        assert_eq!(scheduler.interval_seconds(), 60.0 / MIN_BPM);
    }

    #[test]
    fn run_clock_accumulates_across_pauses() {
        let mut clock = RunClock::new();
        clock.resume();
        thread::sleep(Duration::from_millis(60));
        clock.pause();
        let first = clock.elapsed();
        assert!(first >= Duration::from_millis(50));

        // Paused time does not count.
        thread::sleep(Duration::from_millis(60));
        assert_eq!(clock.elapsed(), first);

        clock.resume();
        thread::sleep(Duration::from_millis(40));
        clock.pause();
        assert!(clock.elapsed() >= first + Duration::from_millis(30));

        clock.reset();
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
