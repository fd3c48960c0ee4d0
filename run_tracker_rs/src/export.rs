use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerResult;
use crate::session::SessionState;
use crate::types::{FilteredLocation, RawFix, TrackingPhase};

/// Convert epoch seconds to RFC 3339. Out-of-range values clamp to the epoch.
pub fn timestamp_to_rfc3339(timestamp: f64) -> String {
    let secs = if timestamp.is_finite() && timestamp > 0.0 { timestamp } else { 0.0 };
    DateTime::<Utc>::from(UNIX_EPOCH + Duration::from_secs_f64(secs)).to_rfc3339()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub session_id: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub phase: TrackingPhase,
    pub stats: SessionStats,
}

/// Complete session export, ready for upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub metadata: ExportMetadata,
    pub raw_fixes: Vec<RawFix>,
    pub filtered_route: Vec<FilteredLocation>,
}

impl SessionExport {
    pub fn from_session(session: &SessionState) -> Self {
        let started = session.started_at.unwrap_or(0.0);
        let metadata = ExportMetadata {
            session_id: format!("run_{}", (started * 1000.0).round() as i64),
            start_time: timestamp_to_rfc3339(started),
            end_time: session.stopped_at.map(timestamp_to_rfc3339),
            phase: session.phase,
            stats: SessionStats::from_session(session),
        };
        SessionExport {
            metadata,
            raw_fixes: session.raw_fixes.clone(),
            filtered_route: session.filtered_route.clone(),
        }
    }

    pub fn to_json(&self) -> TrackerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json_bytes(&self) -> TrackerResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(json: &str) -> TrackerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_gpx(&self) -> String {
        let name = format!("Run {}", self.metadata.session_id);
        let desc = format!("Recorded from {}", self.metadata.start_time);
        route_to_gpx(&name, &desc, &self.filtered_route)
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// GPX 1.1 track of the real (non-interpolated) locations
pub fn route_to_gpx(name: &str, description: &str, route: &[FilteredLocation]) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(
        "<gpx version=\"1.1\" creator=\"RunTracker\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n",
    );
    xml.push_str("  <metadata>\n");
    xml.push_str(&format!("    <name>{}</name>\n", xml_escape(name)));
    xml.push_str(&format!("    <desc>{}</desc>\n", xml_escape(description)));
    xml.push_str("  </metadata>\n");
    xml.push_str("  <trk>\n");
    xml.push_str(&format!("    <name>{}</name>\n", xml_escape(name)));
    xml.push_str("    <trkseg>\n");

    for point in route.iter().filter(|l| !l.interpolated) {
        xml.push_str(&format!(
            "      <trkpt lat=\"{:.7}\" lon=\"{:.7}\">\n",
            point.latitude, point.longitude
        ));
        if point.altitude.is_finite() {
            xml.push_str(&format!("        <ele>{:.1}</ele>\n", point.altitude));
        }
        xml.push_str(&format!(
            "        <time>{}</time>\n",
            timestamp_to_rfc3339(point.timestamp)
        ));
        xml.push_str("      </trkpt>\n");
    }

    xml.push_str("    </trkseg>\n");
    xml.push_str("  </trk>\n");
    xml.push_str("</gpx>\n");
    xml
}

/// Summary figures for display and upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Wall time from start to stop (or last location) minus pauses (s)
    pub duration_seconds: f64,
    /// Time across intervals that contributed distance (s)
    pub moving_seconds: f64,
    pub total_distance_meters: f64,
    /// Seconds per kilometer over moving time; None below 10 m
    pub average_pace_s_per_km: Option<f64>,
    pub max_speed_ms: f64,
    pub elevation_gain_meters: f64,
    pub raw_fix_count: usize,
    pub filtered_count: usize,
}

impl SessionStats {
    pub fn from_session(session: &SessionState) -> Self {
        let real: Vec<&FilteredLocation> = session
            .filtered_route
            .iter()
            .filter(|l| !l.interpolated)
            .collect();

        let end = session
            .stopped_at
            .or_else(|| real.last().map(|l| l.timestamp));
        let duration_seconds = match (session.started_at, end) {
            (Some(s), Some(e)) => (e - s - session.paused_secs).max(0.0),
            _ => 0.0,
        };

        let mut moving_seconds = 0.0;
        let mut elevation_gain_meters = 0.0;
        for pair in real.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if b.distance_from_previous > 0.0 {
                moving_seconds += (b.timestamp - a.timestamp).max(0.0);
            }
            if a.altitude.is_finite() && b.altitude.is_finite() && b.altitude > a.altitude {
                elevation_gain_meters += b.altitude - a.altitude;
            }
        }

        let total = session.cumulative_distance;
        let average_pace_s_per_km = if total >= 10.0 && moving_seconds > 0.0 {
            Some(moving_seconds / (total / 1000.0))
        } else {
            None
        };
        let max_speed_ms = real.iter().map(|l| l.speed).fold(0.0, f64::max);

        SessionStats {
            duration_seconds,
            moving_seconds,
            total_distance_meters: total,
            average_pace_s_per_km,
            max_speed_ms,
            elevation_gain_meters,
            raw_fix_count: session.raw_fixes.len(),
            filtered_count: session.filtered_route.len(),
        }
    }
}
