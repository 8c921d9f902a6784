use crate::models::Alarm;
use std::collections::BTreeSet;

/// Insertion-ordered alarm list. Alarms are never removed; acknowledging only
/// flips the flag on the matching record.
#[derive(Debug, Clone, Default)]
pub struct AlarmList {
    alarms: Vec<Alarm>,
}

impl AlarmList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an alarm. An id that is already listed is ignored so an
    /// acknowledged alarm cannot come back as new.
    pub fn push(&mut self, alarm: Alarm) -> bool {
        if self.alarms.iter().any(|a| a.id == alarm.id) {
            return false;
        }
        self.alarms.push(alarm);
        true
    }

    /// Mark the alarm with `id` acknowledged. Returns false for unknown ids.
    pub fn acknowledge(&mut self, id: &str) -> bool {
        match self.alarms.iter_mut().find(|a| a.id == id) {
            Some(alarm) => {
                alarm.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Returns how many alarms changed state
    pub fn acknowledge_all(&mut self) -> usize {
        let mut changed = 0;
        for alarm in self.alarms.iter_mut().filter(|a| !a.acknowledged) {
            alarm.acknowledged = true;
            changed += 1;
        }
        changed
    }

    pub fn all(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn unacknowledged(&self) -> impl Iterator<Item = &Alarm> {
        self.alarms.iter().filter(|a| !a.acknowledged)
    }

    pub fn acknowledged_ids(&self) -> BTreeSet<String> {
        self.alarms
            .iter()
            .filter(|a| a.acknowledged)
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Alarm> {
        self.alarms.iter().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlarmSeverity;
    use chrono::Utc;

    fn alarm(id: &str) -> Alarm {
        Alarm {
            id: id.to_string(),
            severity: AlarmSeverity::Warning,
            title: format!("alarm {id}"),
            message: String::new(),
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut list = AlarmList::new();
        list.push(alarm("a"));
        list.push(alarm("b"));
        list.push(alarm("c"));

        assert!(list.acknowledge("b"));
        let first = list.acknowledged_ids();
        assert!(list.acknowledge("b"));
        let second = list.acknowledged_ids();

        assert_eq!(first, second);
        assert_eq!(second.into_iter().collect::<Vec<_>>(), vec!["b".to_string()]);
        assert!(!list.get("a").unwrap().acknowledged);
        assert!(!list.get("c").unwrap().acknowledged);
    }

    #[test]
    fn test_unknown_id_changes_nothing() {
        let mut list = AlarmList::new();
        list.push(alarm("a"));
        assert!(!list.acknowledge("zzz"));
        assert!(list.acknowledged_ids().is_empty());
    }

    #[test]
    fn test_acknowledged_alarm_not_resurfaced() {
        let mut list = AlarmList::new();
        list.push(alarm("a"));
        list.acknowledge("a");

        assert!(!list.push(alarm("a")));
        assert_eq!(list.len(), 1);
        assert_eq!(list.unacknowledged().count(), 0);
    }

    #[test]
    fn test_insertion_order_kept() {
        let mut list = AlarmList::new();
        for id in ["x", "a", "m"] {
            list.push(alarm(id));
        }
        let ids: Vec<&str> = list.all().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "a", "m"]);
        assert_eq!(list.acknowledge_all(), 3);
        assert_eq!(list.acknowledge_all(), 0);
    }
}
