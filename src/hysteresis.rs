use crate::classifier::Label;

/// Debounce phase for the alert signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Calm,
    Alerting,
}

/// Converts the noisy per-window label stream into a debounced alert signal.
///
/// Escalation requires `threshold` consecutive anomalous labels; recovery is
/// immediate on a single normal label. While already alerting, further
/// anomalous labels do not re-emit.
#[derive(Debug, Clone)]
pub struct AnomalyDebouncer {
    threshold: u32,
    consecutive: u32,
    phase: AlertPhase,
}

impl AnomalyDebouncer {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            phase: AlertPhase::Calm,
        }
    }

    /// Feed one per-window label. Returns `true` exactly when an alert event
    /// must be emitted (the Calm -> Alerting transition).
    pub fn observe(&mut self, label: Label) -> bool {
        match label {
            Label::Normal => {
                self.consecutive = 0;
                self.phase = AlertPhase::Calm;
                false
            }
            Label::Anomalous => {
                self.consecutive = self.consecutive.saturating_add(1);
                if self.phase == AlertPhase::Calm && self.consecutive >= self.threshold {
                    self.phase = AlertPhase::Alerting;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn phase(&self) -> AlertPhase {
        self.phase
    }

    pub fn consecutive_anomalies(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Label::{Anomalous, Normal};

    fn fired(debouncer: &mut AnomalyDebouncer, labels: &[Label]) -> Vec<bool> {
        labels.iter().map(|l| debouncer.observe(*l)).collect()
    }

    #[test]
    fn test_alert_fires_once_at_threshold() {
        let mut debouncer = AnomalyDebouncer::new(3);
        let events = fired(
            &mut debouncer,
            &[Normal, Anomalous, Anomalous, Anomalous, Normal],
        );
        assert_eq!(events, vec![false, false, false, true, false]);
        assert_eq!(debouncer.consecutive_anomalies(), 0);
        assert_eq!(debouncer.phase(), AlertPhase::Calm);
    }

    #[test]
    fn test_no_reemission_while_alerting() {
        let mut debouncer = AnomalyDebouncer::new(3);
        let events = fired(
            &mut debouncer,
            &[Anomalous, Anomalous, Anomalous, Anomalous, Anomalous],
        );
        assert_eq!(events.iter().filter(|e| **e).count(), 1);
        assert_eq!(debouncer.phase(), AlertPhase::Alerting);
    }

    #[test]
    fn test_normal_below_threshold_resets_count() {
        let mut debouncer = AnomalyDebouncer::new(3);
        let events = fired(
            &mut debouncer,
            &[Anomalous, Anomalous, Normal, Anomalous, Anomalous, Anomalous],
        );
        // The reset forces a fresh run of three before escalating
        assert_eq!(events, vec![false, false, false, false, false, true]);
    }

    #[test]
    fn test_recovery_then_reescalation_fires_again() {
        let mut debouncer = AnomalyDebouncer::new(2);
        assert!(!debouncer.observe(Anomalous));
        assert!(debouncer.observe(Anomalous));
        assert!(!debouncer.observe(Anomalous));
        // One normal recovers immediately
        assert!(!debouncer.observe(Normal));
        assert_eq!(debouncer.phase(), AlertPhase::Calm);
        // A new episode may escalate again
        assert!(!debouncer.observe(Anomalous));
        assert!(debouncer.observe(Anomalous));
    }

    #[test]
    fn test_threshold_floor_is_one() {
        let mut debouncer = AnomalyDebouncer::new(0);
        assert!(debouncer.observe(Anomalous));
    }
}
