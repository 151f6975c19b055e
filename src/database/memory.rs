use super::models::{Report, Reporter, Role};
use super::{sort_oldest_first, DatabaseError, ReportFilter, Store};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    reports: HashMap<String, Report>,
    reporters: HashMap<String, Reporter>,
}

/// Process-local store; one lock covers both collections.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, DatabaseError> {
        self.state.lock().map_err(|_| DatabaseError::Poisoned)
    }
}

fn touch_reporter<'a>(state: &'a mut MemoryState, id: &str) -> &'a mut Reporter {
    state
        .reporters
        .entry(id.to_string())
        .or_insert_with(|| Reporter::new(id, Role::User))
}

impl Store for MemoryStore {
    fn insert_report(&self, report: &Report) -> Result<(), DatabaseError> {
        let mut state = self.lock()?;
        if state.reports.contains_key(&report.id) {
            return Err(DatabaseError::Conflict(report.id.clone()));
        }
        state.reports.insert(report.id.clone(), report.clone());
        Ok(())
    }

    fn find_report(&self, id: &str) -> Result<Option<Report>, DatabaseError> {
        Ok(self.lock()?.reports.get(id).cloned())
    }

    fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>, DatabaseError> {
        let mut reports: Vec<Report> = self
            .lock()?
            .reports
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_oldest_first(&mut reports);
        Ok(reports)
    }

    fn update_report(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Report),
    ) -> Result<Option<Report>, DatabaseError> {
        let mut state = self.lock()?;
        Ok(state.reports.get_mut(id).map(|report| {
            apply(report);
            report.clone()
        }))
    }

    fn update_report_awarding(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Report) -> u32,
    ) -> Result<Option<Report>, DatabaseError> {
        let mut state = self.lock()?;
        let Some(report) = state.reports.get_mut(id) else {
            return Ok(None);
        };
        let award = apply(report);
        let updated = report.clone();

        if award > 0 {
            touch_reporter(&mut state, &updated.reporter_id).award(award);
        }
        Ok(Some(updated))
    }

    fn delete_report(&self, id: &str) -> Result<Option<Report>, DatabaseError> {
        Ok(self.lock()?.reports.remove(id))
    }

    fn find_reporter(&self, id: &str) -> Result<Option<Reporter>, DatabaseError> {
        Ok(self.lock()?.reporters.get(id).cloned())
    }

    fn list_reporters(&self) -> Result<Vec<Reporter>, DatabaseError> {
        let mut reporters: Vec<Reporter> = self.lock()?.reporters.values().cloned().collect();
        reporters.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(reporters)
    }

    fn save_reporter(&self, reporter: &Reporter) -> Result<(), DatabaseError> {
        self.lock()?
            .reporters
            .insert(reporter.id.clone(), reporter.clone());
        Ok(())
    }

    fn update_reporter(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Reporter),
    ) -> Result<Reporter, DatabaseError> {
        let mut state = self.lock()?;
        let reporter = touch_reporter(&mut state, id);
        apply(reporter);
        Ok(reporter.clone())
    }

    fn commit_submission(
        &self,
        report: &Report,
        apply: &mut dyn FnMut(&mut Reporter),
    ) -> Result<Reporter, DatabaseError> {
        let mut state = self.lock()?;
        if state.reports.contains_key(&report.id) {
            return Err(DatabaseError::Conflict(report.id.clone()));
        }
        state.reports.insert(report.id.clone(), report.clone());

        let reporter = touch_reporter(&mut state, &report.reporter_id);
        apply(reporter);
        Ok(reporter.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::exercise_store;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_memory_store_contract() {
        exercise_store(&MemoryStore::new());
    }

    #[test]
    fn test_concurrent_counter_updates_are_not_lost() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store.update_reporter("usr_1", &mut |r| r.award(1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.find_reporter("usr_1").unwrap().unwrap().points, 800);
    }
}
