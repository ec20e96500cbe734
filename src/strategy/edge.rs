//! Dislocation detection.
//!
//! Measures the windowed mid-price move on each side and emits at most
//! one pump/dump trigger per evaluation. Also computes the static edge
//! `(1 - (ask_yes + ask_no)) * 10000` that gates whether a trigger is
//! worth acting on. Pure: holds nothing but its configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::debug;

use crate::data::window::RollingWindow;
use crate::types::{BotError, TriggerDirection, TriggerEvent};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which move directions may fire a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Dump,
    Pump,
    #[default]
    Both,
}

impl TriggerMode {
    pub fn allows(&self, direction: TriggerDirection) -> bool {
        match (self, direction) {
            (TriggerMode::Both, _) => true,
            (TriggerMode::Dump, TriggerDirection::Dump) => true,
            (TriggerMode::Pump, TriggerDirection::Pump) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Absolute move, in percent, that fires a trigger.
    pub move_pct_threshold: Decimal,
    /// Minimum static edge for a trigger to be eligible.
    pub min_edge_bps: Decimal,
    pub trigger_mode: TriggerMode,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            move_pct_threshold: dec!(10),
            min_edge_bps: dec!(50),
            trigger_mode: TriggerMode::Both,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge detection
// ---------------------------------------------------------------------------

/// Percent move of the mid from the oldest to the newest observation.
///
/// Fewer than two observations, or a zero reference mid, is a feed gap.
pub fn movement_pct(window: &RollingWindow) -> Result<Decimal, BotError> {
    let gap = |detail: String| BotError::FeedGap {
        side: window.side(),
        detail,
    };
    if window.len() < 2 {
        return Err(gap(format!("{} observation(s) in window", window.len())));
    }
    let (oldest, newest) = match (window.oldest(), window.newest()) {
        (Some(o), Some(n)) => (o, n),
        _ => return Err(gap("empty window".to_string())),
    };
    if oldest.mid.is_zero() {
        return Err(gap("zero reference mid".to_string()));
    }
    Ok((newest.mid - oldest.mid) / oldest.mid * dec!(100))
}

/// Static edge in basis points, from the newest ask on each side.
pub fn static_edge_bps(window_yes: &RollingWindow, window_no: &RollingWindow) -> Option<Decimal> {
    let ask_yes = window_yes.newest()?.best_ask;
    let ask_no = window_no.newest()?.best_ask;
    Some((Decimal::ONE - (ask_yes + ask_no)) * dec!(10000))
}

pub struct EdgeDetector {
    config: EdgeConfig,
}

impl EdgeDetector {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// Evaluate both windows and return the strongest trigger, if any.
    ///
    /// When both sides cross the threshold the larger absolute move wins;
    /// equal moves go to the side whose name sorts first.
    pub fn evaluate(
        &self,
        window_yes: &RollingWindow,
        window_no: &RollingWindow,
    ) -> Option<TriggerEvent> {
        let edge_bps = static_edge_bps(window_yes, window_no);

        let mut best: Option<TriggerEvent> = None;
        for window in [window_yes, window_no] {
            let Some(candidate) = self.side_trigger(window, edge_bps) else {
                continue;
            };
            best = match best {
                None => Some(candidate),
                Some(current) => {
                    let (a, b) = (candidate.magnitude_pct.abs(), current.magnitude_pct.abs());
                    if a > b || (a == b && candidate.side.as_str() < current.side.as_str()) {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        if let Some(ref t) = best {
            debug!(
                side = %t.side,
                direction = %t.direction,
                move_pct = %format!("{:.2}%", t.magnitude_pct),
                edge_bps = ?t.edge_bps,
                "Trigger detected"
            );
        }
        best
    }

    fn side_trigger(
        &self,
        window: &RollingWindow,
        edge_bps: Option<Decimal>,
    ) -> Option<TriggerEvent> {
        let move_pct = match movement_pct(window) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "No trigger computed");
                return None;
            }
        };
        let threshold = self.config.move_pct_threshold;
        let direction = if move_pct <= -threshold {
            TriggerDirection::Dump
        } else if move_pct >= threshold {
            TriggerDirection::Pump
        } else {
            return None;
        };
        if !self.config.trigger_mode.allows(direction) {
            return None;
        }
        let newest = window.newest()?;
        Some(TriggerEvent {
            side: window.side(),
            direction,
            magnitude_pct: move_pct,
            reference_price: newest.best_ask,
            edge_bps,
            timestamp: newest.timestamp,
        })
    }

    /// Whether the static edge clears `min_edge_bps`.
    ///
    /// A trigger without an edge (one side unquoted) is never eligible.
    pub fn is_eligible(&self, trigger: &TriggerEvent) -> bool {
        trigger
            .edge_bps
            .is_some_and(|edge| edge >= self.config.min_edge_bps)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PriceObservation, Side};
    use chrono::{Duration, TimeZone, Utc};

    fn window(side: Side, mids: &[Decimal]) -> RollingWindow {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut w = RollingWindow::new(side, Duration::seconds(3));
        for (i, mid) in mids.iter().enumerate() {
            let ts = t0 + Duration::milliseconds(500 * i as i64);
            w.push(PriceObservation::new("m", side, *mid, *mid, ts));
        }
        w
    }

    fn detector(threshold: Decimal) -> EdgeDetector {
        EdgeDetector::new(EdgeConfig {
            move_pct_threshold: threshold,
            ..EdgeConfig::default()
        })
    }

    #[test]
    fn test_dump_at_ten_percent_threshold() {
        let yes = window(Side::Yes, &[dec!(100), dec!(100), dec!(89)]);
        let no = window(Side::No, &[dec!(100), dec!(100), dec!(100)]);
        let trigger = detector(dec!(10)).evaluate(&yes, &no).unwrap();
        assert_eq!(trigger.side, Side::Yes);
        assert_eq!(trigger.direction, TriggerDirection::Dump);
        assert_eq!(trigger.magnitude_pct, dec!(-11));
        assert_eq!(trigger.reference_price, dec!(89));
    }

    #[test]
    fn test_no_trigger_at_twelve_percent_threshold() {
        let yes = window(Side::Yes, &[dec!(100), dec!(100), dec!(89)]);
        let no = window(Side::No, &[dec!(100), dec!(100), dec!(100)]);
        assert!(detector(dec!(12)).evaluate(&yes, &no).is_none());
    }

    #[test]
    fn test_pump_detected() {
        let yes = window(Side::Yes, &[dec!(0.50), dec!(0.50)]);
        let no = window(Side::No, &[dec!(0.30), dec!(0.36)]);
        let trigger = detector(dec!(10)).evaluate(&yes, &no).unwrap();
        assert_eq!(trigger.side, Side::No);
        assert_eq!(trigger.direction, TriggerDirection::Pump);
        assert_eq!(trigger.magnitude_pct, dec!(20));
    }

    #[test]
    fn test_larger_move_wins() {
        let yes = window(Side::Yes, &[dec!(0.50), dec!(0.40)]); // -20%
        let no = window(Side::No, &[dec!(0.40), dec!(0.48)]); // +20%, tie
        let trigger = detector(dec!(10)).evaluate(&yes, &no).unwrap();
        assert_eq!(trigger.side, Side::No);

        let yes = window(Side::Yes, &[dec!(0.50), dec!(0.35)]); // -30%
        let trigger = detector(dec!(10)).evaluate(&yes, &no).unwrap();
        assert_eq!(trigger.side, Side::Yes);
    }

    #[test]
    fn test_single_observation_is_feed_gap() {
        let yes = window(Side::Yes, &[dec!(0.50)]);
        assert!(matches!(
            movement_pct(&yes),
            Err(BotError::FeedGap { side: Side::Yes, .. })
        ));
        let no = window(Side::No, &[dec!(0.50)]);
        assert!(detector(dec!(10)).evaluate(&yes, &no).is_none());
    }

    #[test]
    fn test_zero_reference_mid_is_feed_gap() {
        let yes = window(Side::Yes, &[dec!(0), dec!(0.5)]);
        assert!(movement_pct(&yes).is_err());
    }

    #[test]
    fn test_trigger_mode_filters_direction() {
        let yes = window(Side::Yes, &[dec!(0.50), dec!(0.40)]);
        let no = window(Side::No, &[dec!(0.50), dec!(0.50)]);
        let pump_only = EdgeDetector::new(EdgeConfig {
            trigger_mode: TriggerMode::Pump,
            ..EdgeConfig::default()
        });
        assert!(pump_only.evaluate(&yes, &no).is_none());
        assert!(TriggerMode::Dump.allows(TriggerDirection::Dump));
        assert!(!TriggerMode::Dump.allows(TriggerDirection::Pump));
    }

    #[test]
    fn test_static_edge_and_eligibility() {
        let yes = window(Side::Yes, &[dec!(0.50), dec!(0.40)]);
        let no = window(Side::No, &[dec!(0.55), dec!(0.55)]);
        assert_eq!(static_edge_bps(&yes, &no), Some(dec!(500)));

        let d = detector(dec!(10));
        let trigger = d.evaluate(&yes, &no).unwrap();
        assert_eq!(trigger.edge_bps, Some(dec!(500)));
        assert!(d.is_eligible(&trigger));

        let thin = TriggerEvent {
            edge_bps: Some(dec!(20)),
            ..trigger.clone()
        };
        assert!(!d.is_eligible(&thin));
        let unquoted = TriggerEvent {
            edge_bps: None,
            ..trigger
        };
        assert!(!d.is_eligible(&unquoted));
    }

    #[test]
    fn test_static_edge_missing_side() {
        let yes = window(Side::Yes, &[dec!(0.50)]);
        let no = RollingWindow::new(Side::No, Duration::seconds(3));
        assert_eq!(static_edge_bps(&yes, &no), None);
    }
}
