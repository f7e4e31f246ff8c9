use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use super::id::{SessionId, VideoId};

/// Percentage of the video a viewer must watch to count as a completed viewing
pub const COMPLETED_VIEWING_PERCENT: f64 = 80.0;

/// One quality switch observed by the player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityChange {
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
}

/// Player-side statistics reported when a session closes
///
/// Counters that are `None` keep the value accumulated by the tracking calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub quality_switches: Option<i32>,
    pub average_quality: Option<String>,
    pub average_bitrate: Option<f64>,
    pub buffering_events: Option<i32>,
    pub connection_drops: Option<i32>,
    pub timeline: Option<Vec<QualityChange>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewingSession {
    pub id: SessionId,
    pub video_id: VideoId,
    pub viewer_identity: String,
    pub viewer_ip: Option<String>,
    pub room_name: Option<String>,
    pub started_at: DateTime<Utc>,
    /// `None` while the session is open
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub quality_switches: i32,
    pub average_quality: Option<String>,
    pub average_bitrate: Option<f64>,
    pub buffering_events: i32,
    pub connection_drops: i32,
    pub quality_timeline: Vec<QualityChange>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    /// Last telemetry activity; drives stale-session reaping
    pub updated_at: DateTime<Utc>,
}

impl ViewingSession {
    pub fn new(
        video_id: VideoId,
        room_name: Option<String>,
        viewer_identity: String,
        viewer_ip: Option<String>,
        metadata: JsonValue,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            video_id,
            viewer_identity,
            viewer_ip,
            room_name,
            started_at: now,
            ended_at: None,
            duration_seconds: None,
            quality_switches: 0,
            average_quality: None,
            average_bitrate: None,
            buffering_events: 0,
            connection_drops: 0,
            quality_timeline: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Close the session; returns `false` if it was already closed
    pub fn end(&mut self, now: DateTime<Utc>, summary: Option<QualitySummary>) -> bool {
        if self.ended_at.is_some() {
            return false;
        }

        self.ended_at = Some(now);
        self.duration_seconds = Some((now - self.started_at).num_seconds().max(0));

        if let Some(summary) = summary {
            if let Some(switches) = summary.quality_switches {
                self.quality_switches = switches;
            }
            self.average_quality = summary.average_quality;
            self.average_bitrate = summary.average_bitrate;
            if let Some(events) = summary.buffering_events {
                self.buffering_events = events;
            }
            if let Some(drops) = summary.connection_drops {
                self.connection_drops = drops;
            }
            if let Some(timeline) = summary.timeline {
                self.quality_timeline = timeline;
            }
        }

        self.updated_at = now;
        true
    }

    pub fn record_quality_change(&mut self, from: String, to: String, now: DateTime<Utc>) {
        self.quality_switches += 1;
        self.quality_timeline.push(QualityChange {
            timestamp: now,
            from,
            to,
        });
        self.updated_at = now;
    }

    pub fn record_buffering(&mut self, duration_ms: Option<u64>, now: DateTime<Utc>) {
        self.buffering_events += 1;
        self.append_log("buffer_log", json!({ "timestamp": now, "duration_ms": duration_ms }));
        self.updated_at = now;
    }

    pub fn record_connection_drop(&mut self, reason: Option<String>, now: DateTime<Utc>) {
        self.connection_drops += 1;
        self.append_log("drop_log", json!({ "timestamp": now, "reason": reason }));
        self.updated_at = now;
    }

    // Logs only go into object metadata; anything else is left alone
    fn append_log(&mut self, key: &str, entry: JsonValue) {
        if let JsonValue::Object(map) = &mut self.metadata {
            match map.get_mut(key) {
                Some(JsonValue::Array(log)) => log.push(entry),
                _ => {
                    map.insert(key.to_string(), JsonValue::Array(vec![entry]));
                }
            }
        }
    }

    /// Share of the video watched, capped at 100 and rounded to two decimals
    pub fn watch_percentage(&self, video_duration_seconds: Option<i64>) -> f64 {
        match (video_duration_seconds, self.duration_seconds) {
            (Some(total), Some(watched)) if total > 0 => {
                let pct = watched as f64 / total as f64 * 100.0;
                round2(pct).min(100.0)
            }
            _ => 0.0,
        }
    }

    pub fn completed_viewing(&self, video_duration_seconds: Option<i64>) -> bool {
        self.watch_percentage(video_duration_seconds) >= COMPLETED_VIEWING_PERCENT
    }

    /// "45s", "3m 20s", "1h 5m", or "In progress" while open
    pub fn duration_human(&self) -> String {
        if self.ended_at.is_none() {
            return "In progress".to_string();
        }

        let seconds = self.duration_seconds.unwrap_or(0);
        if seconds < 60 {
            format!("{seconds}s")
        } else if seconds < 3600 {
            format!("{}m {}s", seconds / 60, seconds % 60)
        } else {
            format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
