//! Pipeline statistics tracking for debugging and performance analysis.
//!
//! Enable pipeline stats by compiling with the `render-stats` feature:
//! ```bash
//! cargo test --features render-stats
//! ```
//!
//! Stats are printed once per second at flush time, showing:
//! - Nodes repainted vs nudged (and nudge fallbacks to full regeneration)
//! - Command splices
//! - Clip downgrades (stencil or shader-discard demoted to scissor)
//! - Property-table exhaustion events and uploads

/// Snapshot of accumulated pipeline statistics.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub flushes: u64,
    pub nodes_painted: u64,
    pub nodes_nudged: u64,
    pub nudge_fallbacks: u64,
    pub commands_spliced: u64,
    pub clip_downgrades: u64,
    pub property_exhausted: u64,
    pub property_uploads: u64,
}

#[cfg(feature = "render-stats")]
mod inner {
    use std::cell::RefCell;
    use std::time::Instant;

    thread_local! {
        static STATS: RefCell<PipelineStats> = RefCell::new(PipelineStats::new());
    }

    struct PipelineStats {
        flushes: u64,
        nodes_painted: u64,
        nodes_nudged: u64,
        nudge_fallbacks: u64,
        commands_spliced: u64,
        clip_downgrades: u64,
        property_exhausted: u64,
        property_uploads: u64,
        last_print: Instant,
    }

    impl PipelineStats {
        fn new() -> Self {
            Self {
                flushes: 0,
                nodes_painted: 0,
                nodes_nudged: 0,
                nudge_fallbacks: 0,
                commands_spliced: 0,
                clip_downgrades: 0,
                property_exhausted: 0,
                property_uploads: 0,
                last_print: Instant::now(),
            }
        }

        fn reset(&mut self) {
            self.flushes = 0;
            self.nodes_painted = 0;
            self.nodes_nudged = 0;
            self.nudge_fallbacks = 0;
            self.commands_spliced = 0;
            self.clip_downgrades = 0;
            self.property_exhausted = 0;
            self.property_uploads = 0;
            self.last_print = Instant::now();
        }
    }

    /// Record a node whose mesh and commands were fully regenerated.
    #[inline]
    pub fn record_node_painted() {
        STATS.with(|s| {
            s.borrow_mut().nodes_painted += 1;
        });
    }

    /// Record a node whose vertices were patched in place.
    #[inline]
    pub fn record_node_nudged() {
        STATS.with(|s| {
            s.borrow_mut().nodes_nudged += 1;
        });
    }

    /// Record a nudge attempt that fell back to full regeneration.
    #[inline]
    pub fn record_nudge_fallback() {
        STATS.with(|s| {
            s.borrow_mut().nudge_fallbacks += 1;
        });
    }

    /// Record a command spliced into the global list.
    #[inline]
    pub fn record_command_spliced() {
        STATS.with(|s| {
            s.borrow_mut().commands_spliced += 1;
        });
    }

    /// Record a clip strategy demoted to scissor (slot exhaustion or
    /// unstable bounds).
    #[inline]
    pub fn record_clip_downgrade() {
        STATS.with(|s| {
            s.borrow_mut().clip_downgrades += 1;
        });
    }

    /// Record a failed property-slot allocation.
    #[inline]
    pub fn record_property_exhausted() {
        STATS.with(|s| {
            s.borrow_mut().property_exhausted += 1;
        });
    }

    /// Record a property-table upload to the device.
    #[inline]
    pub fn record_property_upload() {
        STATS.with(|s| {
            s.borrow_mut().property_uploads += 1;
        });
    }

    /// Return a snapshot of the current stats (for testing).
    pub fn get_stats() -> super::StatsSnapshot {
        STATS.with(|s| {
            let stats = s.borrow();
            super::StatsSnapshot {
                flushes: stats.flushes,
                nodes_painted: stats.nodes_painted,
                nodes_nudged: stats.nodes_nudged,
                nudge_fallbacks: stats.nudge_fallbacks,
                commands_spliced: stats.commands_spliced,
                clip_downgrades: stats.clip_downgrades,
                property_exhausted: stats.property_exhausted,
                property_uploads: stats.property_uploads,
            }
        })
    }

    /// Reset all stats to zero (for test isolation).
    pub fn reset_stats() {
        STATS.with(|s| {
            s.borrow_mut().reset();
        });
    }

    /// Called at the end of each flush to potentially print stats.
    pub fn end_flush() {
        STATS.with(|s| {
            let mut stats = s.borrow_mut();
            stats.flushes += 1;

            let elapsed = stats.last_print.elapsed();
            if elapsed.as_secs() >= 1 {
                let repaint_total = stats.nodes_painted + stats.nodes_nudged;
                let nudge_rate = if repaint_total > 0 {
                    (stats.nodes_nudged as f64 / repaint_total as f64) * 100.0
                } else {
                    0.0
                };

                eprintln!(
                    "[Pipeline Stats] flushes={} painted={} nudged={} nudge_rate={:.1}% fallbacks={}",
                    stats.flushes,
                    stats.nodes_painted,
                    stats.nodes_nudged,
                    nudge_rate,
                    stats.nudge_fallbacks
                );
                eprintln!(
                    "  commands: spliced={}  clips: downgraded={}",
                    stats.commands_spliced, stats.clip_downgrades
                );
                eprintln!(
                    "  properties: exhausted={} uploads={}",
                    stats.property_exhausted, stats.property_uploads
                );

                stats.reset();
            }
        });
    }
}

#[cfg(feature = "render-stats")]
pub use inner::*;

// No-op implementations when feature is disabled - these get completely inlined away

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn get_stats() -> StatsSnapshot {
    StatsSnapshot::default()
}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn reset_stats() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_node_painted() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_node_nudged() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_nudge_fallback() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_command_spliced() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_clip_downgrade() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_property_exhausted() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn record_property_upload() {}

#[cfg(not(feature = "render-stats"))]
#[inline(always)]
pub fn end_flush() {}

#[cfg(test)]
#[cfg(feature = "render-stats")]
mod tests {
    use super::*;

    /// Reset stats before each test to ensure isolation
    /// (tests share the thread-local when run on the same thread).
    fn setup() {
        reset_stats();
    }

    #[test]
    fn test_paint_and_nudge_counters() {
        setup();
        record_node_painted();
        record_node_painted();
        record_node_nudged();
        record_nudge_fallback();
        let s = get_stats();
        assert_eq!(s.nodes_painted, 2);
        assert_eq!(s.nodes_nudged, 1);
        assert_eq!(s.nudge_fallbacks, 1);
    }

    #[test]
    fn test_splice_counter() {
        setup();
        record_command_spliced();
        record_command_spliced();
        let s = get_stats();
        assert_eq!(s.commands_spliced, 2);
    }

    #[test]
    fn test_reset_clears_all_counters() {
        setup();
        record_node_painted();
        record_clip_downgrade();
        record_property_exhausted();
        record_property_upload();
        end_flush();
        assert_ne!(get_stats(), StatsSnapshot::default());

        reset_stats();
        assert_eq!(get_stats(), StatsSnapshot::default());
    }
}
