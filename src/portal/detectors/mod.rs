//! Rollcall result detection.
//!
//! Classifies portal pages by fixed marker substrings. Markers are matched
//! verbatim in the portal's locale (Traditional Chinese by default); a
//! wording change on the portal degrades to "no match", never to an error.

use serde::{Deserialize, Serialize};

use crate::portal::core::RollcallOutcome;

/// Page already shows the attendance as recorded.
pub const COMPLETED_MARKER: &str = "完成報到";
/// Rollcall window is closed.
pub const ENDED_MARKER: &str = "點名已結束";
/// QR code expired; the student has to scan again.
pub const RESCAN_MARKER: &str = "請重新掃描";
/// Error banner rendered on the login page after a rejected password.
pub const BAD_CREDENTIALS_MARKER: &str = "您輸入的帳號或密碼不正確";

/// Marker substrings per outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSet {
    pub completed: Vec<String>,
    pub ended: Vec<String>,
    pub rescan: Vec<String>,
    pub bad_credentials: Vec<String>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self {
            completed: vec![COMPLETED_MARKER.to_string()],
            ended: vec![ENDED_MARKER.to_string()],
            rescan: vec![RESCAN_MARKER.to_string()],
            bad_credentials: vec![BAD_CREDENTIALS_MARKER.to_string()],
        }
    }
}

/// A definitive verdict read from a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub outcome: RollcallOutcome,
    pub marker: String,
}

/// First-match-wins classifier over rollcall pages.
#[derive(Debug, Clone)]
pub struct ResultClassifier {
    // Ordered by priority.
    rules: Vec<(RollcallOutcome, Vec<String>)>,
    bad_credentials: Vec<String>,
}

impl ResultClassifier {
    pub fn new(markers: &MarkerSet) -> Self {
        let rules = vec![
            (RollcallOutcome::Success, non_empty(&markers.completed)),
            (RollcallOutcome::AlreadyEnded, non_empty(&markers.ended)),
            (RollcallOutcome::NeedsRescan, non_empty(&markers.rescan)),
        ];

        Self {
            rules,
            bad_credentials: non_empty(&markers.bad_credentials),
        }
    }

    /// Definitive rollcall outcome for `body`, or `None` when inconclusive.
    pub fn classify(&self, body: &str) -> Option<Detection> {
        self.rules.iter().find_map(|(outcome, markers)| {
            markers
                .iter()
                .find(|marker| body.contains(marker.as_str()))
                .map(|marker| Detection {
                    outcome: *outcome,
                    marker: marker.clone(),
                })
        })
    }

    /// Whether `body` carries the portal's wrong-credentials banner.
    ///
    /// Only meaningful for pages returned after a login submission.
    pub fn indicates_bad_credentials(&self, body: &str) -> bool {
        self.bad_credentials
            .iter()
            .any(|marker| body.contains(marker.as_str()))
    }
}

impl Default for ResultClassifier {
    fn default() -> Self {
        Self::new(&MarkerSet::default())
    }
}

// An empty marker would match every page.
fn non_empty(markers: &[String]) -> Vec<String> {
    markers
        .iter()
        .filter(|marker| !marker.is_empty())
        .cloned()
        .collect()
}
