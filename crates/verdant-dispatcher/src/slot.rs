//! Effective-slot selection.
//!
//! Given a schedule and the current time, pick the slot a request
//! should use: recommendations are walked in priority order and the
//! first one that has not expired wins. A slot whose hour has begun
//! runs now; a future slot becomes a deferral. Expired slots (hour
//! fully elapsed) are skipped, so a stale schedule eventually yields no
//! viable slot at all.

use chrono::{DateTime, Duration, Utc};

use verdant_core::{Recommendation, Schedule};

/// What to do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// The slot's hour is in progress; forward immediately.
    Now,
    /// The slot is in the future; defer via the task queue.
    Deferred,
}

/// A chosen slot.
#[derive(Debug, Clone)]
pub struct EffectiveSlot<'a> {
    pub kind: SlotKind,
    pub recommendation: &'a Recommendation,
}

/// Viable slots in priority order.
///
/// The first entry is the effective slot; later entries are the
/// fallbacks tried when a region has no deployed URL or the target
/// fails.
pub fn viable_slots(schedule: &Schedule, now: DateTime<Utc>) -> Vec<EffectiveSlot<'_>> {
    schedule
        .ranked()
        .into_iter()
        .filter(|rec| rec.hour_start_utc + Duration::hours(1) > now)
        .map(|rec| EffectiveSlot {
            kind: if rec.hour_start_utc <= now {
                SlotKind::Now
            } else {
                SlotKind::Deferred
            },
            recommendation: rec,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use verdant_core::{ForecastMode, FunctionId};

    fn at(h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 20, h, min, 0).unwrap()
    }

    fn rec(priority: u32, region: &str, h: u32, ci: f64) -> Recommendation {
        Recommendation {
            priority,
            region: region.to_string(),
            hour_start_utc: at(h, 0),
            carbon_intensity_g_per_kwh: ci,
            transfer_cost_usd: 0.0,
            rationale: String::new(),
        }
    }

    fn schedule(recs: Vec<Recommendation>) -> Schedule {
        Schedule {
            function_id: FunctionId::new("f"),
            horizon_start_utc: at(12, 0),
            generated_at_utc: at(12, 0),
            mode: ForecastMode::Forecast,
            recommendations: recs,
            deployment: BTreeMap::new(),
            metadata_hash: "00".to_string(),
        }
    }

    #[test]
    fn better_priority_future_slot_wins_over_active_slot() {
        // Priority 1 is R2 at 13:00 (CI 50); priority 2 is R1 at 12:00
        // (CI 200). At 12:30 the dispatcher defers to R2 at 13:00.
        let s = schedule(vec![rec(1, "r2", 13, 50.0), rec(2, "r1", 12, 200.0)]);
        let slots = viable_slots(&s, at(12, 30));

        assert_eq!(slots[0].kind, SlotKind::Deferred);
        assert_eq!(slots[0].recommendation.region, "r2");
        assert_eq!(slots[0].recommendation.hour_start_utc, at(13, 0));
        // The active slot remains as fallback.
        assert_eq!(slots[1].kind, SlotKind::Now);
        assert_eq!(slots[1].recommendation.region, "r1");
    }

    #[test]
    fn active_top_priority_runs_now() {
        let s = schedule(vec![rec(1, "r1", 12, 50.0), rec(2, "r2", 13, 60.0)]);
        let slots = viable_slots(&s, at(12, 30));
        assert_eq!(slots[0].kind, SlotKind::Now);
        assert_eq!(slots[0].recommendation.region, "r1");
    }

    #[test]
    fn expired_slots_are_skipped() {
        let s = schedule(vec![rec(1, "r1", 12, 50.0), rec(2, "r2", 15, 60.0)]);
        let slots = viable_slots(&s, at(13, 5));
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].recommendation.region, "r2");
        assert_eq!(slots[0].kind, SlotKind::Deferred);
    }

    #[test]
    fn fully_stale_schedule_has_no_viable_slots() {
        let s = schedule(vec![rec(1, "r1", 12, 50.0)]);
        assert!(viable_slots(&s, at(14, 0)).is_empty());
    }

    #[test]
    fn slot_active_until_the_hour_ends() {
        let s = schedule(vec![rec(1, "r1", 12, 50.0)]);
        assert_eq!(viable_slots(&s, at(12, 59)).len(), 1);
        assert!(viable_slots(&s, at(13, 0)).is_empty());
    }
}
