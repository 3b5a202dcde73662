//! Health monitoring and progress counters for a transcode

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Counters of one transcode job.
///
/// All fields use atomic operations so an observer thread can read them while
/// the worker loop updates them.
pub struct PipelineHealth {
    started: Instant,

    /// Frames delivered by the decoders
    pub frames_decoded: AtomicU64,

    /// Frames passed through the enhancer
    pub frames_enhanced: AtomicU64,

    /// Frames handed to an encoder
    pub frames_encoded: AtomicU64,

    /// Corrupt packets the decoders skipped
    pub packets_skipped: AtomicU64,

    /// Packets written to the container
    pub packets_muxed: AtomicU64,

    /// Payload bytes written to the container
    pub bytes_muxed: AtomicU64,

    /// Presentation time of the last encoded frame, in milliseconds
    pub media_time_ms: AtomicU64,

    /// Microseconds since `started` at the last recorded frame
    last_frame_us: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            frames_decoded: AtomicU64::new(0),
            frames_enhanced: AtomicU64::new(0),
            frames_encoded: AtomicU64::new(0),
            packets_skipped: AtomicU64::new(0),
            packets_muxed: AtomicU64::new(0),
            bytes_muxed: AtomicU64::new(0),
            media_time_ms: AtomicU64::new(0),
            last_frame_us: AtomicU64::new(0),
        }
    }

    pub fn record_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_enhanced(&self) {
        self.frames_enhanced.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame handed to an encoder at `pts` seconds.
    pub fn record_encoded(&self, pts: f64) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
        self.media_time_ms
            .fetch_max((pts.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
        self.touch();
    }

    /// Set the running total of skipped packets (decoders count them).
    pub fn set_packets_skipped(&self, total: u64) {
        self.packets_skipped.store(total, Ordering::Relaxed);
    }

    pub fn record_muxed(&self, packets: u64, bytes: u64) {
        self.packets_muxed.fetch_add(packets, Ordering::Relaxed);
        self.bytes_muxed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn frames_enhanced(&self) -> u64 {
        self.frames_enhanced.load(Ordering::Relaxed)
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded.load(Ordering::Relaxed)
    }

    pub fn packets_skipped(&self) -> u64 {
        self.packets_skipped.load(Ordering::Relaxed)
    }

    pub fn packets_muxed(&self) -> u64 {
        self.packets_muxed.load(Ordering::Relaxed)
    }

    pub fn bytes_muxed(&self) -> u64 {
        self.bytes_muxed.load(Ordering::Relaxed)
    }

    /// Seconds of media encoded so far.
    pub fn media_time(&self) -> f64 {
        self.media_time_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Media seconds encoded per wall-clock second.
    pub fn speed(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.media_time() / elapsed
    }

    /// Check if no frame was recorded for `threshold`
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last = Duration::from_micros(self.last_frame_us.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last) > threshold
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_decoded: self.frames_decoded(),
            frames_enhanced: self.frames_enhanced(),
            frames_encoded: self.frames_encoded(),
            packets_skipped: self.packets_skipped(),
            packets_muxed: self.packets_muxed(),
            bytes_muxed: self.bytes_muxed(),
            media_time: self.media_time(),
            speed: self.speed(),
        }
    }

    fn touch(&self) {
        self.last_frame_us
            .store(self.started.elapsed().as_micros() as u64, Ordering::Relaxed);
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSummary {
    pub frames_decoded: u64,
    pub frames_enhanced: u64,
    pub frames_encoded: u64,
    pub packets_skipped: u64,
    pub packets_muxed: u64,
    pub bytes_muxed: u64,
    pub media_time: f64,
    pub speed: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "decoded={} enhanced={} encoded={} skipped={} muxed={} ({} bytes) time={:.2}s speed={:.2}x",
            self.frames_decoded,
            self.frames_enhanced,
            self.frames_encoded,
            self.packets_skipped,
            self.packets_muxed,
            self.bytes_muxed,
            self.media_time,
            self.speed
        )
    }
}

/// Health alert types
#[derive(Debug, Clone, PartialEq)]
pub enum HealthAlert {
    /// Periodic progress report
    Progress(HealthSummary),

    /// No frame for the threshold duration
    Stalled { duration: Duration },

    /// New corrupt packets since the last check
    SkippedPackets { count: u64 },
}

impl std::fmt::Display for HealthAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthAlert::Progress(summary) => write!(f, "{}", summary),
            HealthAlert::Stalled { duration } => {
                write!(f, "Pipeline stalled for {:?}", duration)
            }
            HealthAlert::SkippedPackets { count } => {
                write!(f, "Skipped {} corrupt packets", count)
            }
        }
    }
}

/// Periodically checks a job's counters and sends alerts.
pub struct HealthMonitor {
    health: Arc<PipelineHealth>,
    alert_tx: mpsc::Sender<HealthAlert>,
    check_interval: Duration,
    stall_threshold: Duration,
}

impl HealthMonitor {
    pub fn new(health: Arc<PipelineHealth>, alert_tx: mpsc::Sender<HealthAlert>) -> Self {
        Self {
            health,
            alert_tx,
            check_interval: Duration::from_secs(2),
            stall_threshold: Duration::from_secs(10),
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    /// Run until the receiving side is dropped.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.check_interval);
        interval.tick().await;
        let mut last_skipped = 0;

        loop {
            interval.tick().await;

            let mut alerts = vec![HealthAlert::Progress(self.health.summary())];
            if self.health.is_stalled(self.stall_threshold) {
                alerts.push(HealthAlert::Stalled {
                    duration: self.stall_threshold,
                });
            }
            let skipped = self.health.packets_skipped();
            if skipped > last_skipped {
                alerts.push(HealthAlert::SkippedPackets {
                    count: skipped - last_skipped,
                });
                last_skipped = skipped;
            }

            for alert in alerts {
                if self.alert_tx.send(alert).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let health = PipelineHealth::new();
        health.record_decoded();
        health.record_decoded();
        health.record_enhanced();
        health.record_encoded(0.5);
        health.record_encoded(0.25);
        health.record_muxed(3, 300);
        health.set_packets_skipped(2);

        let summary = health.summary();
        assert_eq!(summary.frames_decoded, 2);
        assert_eq!(summary.frames_enhanced, 1);
        assert_eq!(summary.frames_encoded, 2);
        assert_eq!(summary.packets_muxed, 3);
        assert_eq!(summary.bytes_muxed, 300);
        assert_eq!(summary.packets_skipped, 2);
        // media time never goes back
        assert_eq!(summary.media_time, 0.5);
    }

    #[test]
    fn test_stall_detection() {
        let health = PipelineHealth::new();
        assert!(!health.is_stalled(Duration::from_secs(1)));

        health.record_decoded();
        std::thread::sleep(Duration::from_millis(150));
        assert!(health.is_stalled(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_monitor_reports_skipped_packets() {
        let health = Arc::new(PipelineHealth::new());
        health.set_packets_skipped(4);
        let (tx, mut rx) = mpsc::channel(8);
        let monitor = HealthMonitor::new(health.clone(), tx)
            .with_check_interval(Duration::from_millis(10))
            .with_stall_threshold(Duration::from_secs(60));
        let task = tokio::spawn(monitor.run());

        assert!(matches!(rx.recv().await, Some(HealthAlert::Progress(_))));
        assert_eq!(
            rx.recv().await,
            Some(HealthAlert::SkippedPackets { count: 4 })
        );
        drop(rx);
        task.await.unwrap();
    }
}
