//! Pure merge rules between pulled state, push events and the local view
//!
//! Pulls replace their slice wholesale. Each push touches only the slice
//! it names and is an assignment, so reapplying it is a no-op.

use achew_common::events::{ChapterUpdateData, PushEvent};
use achew_common::models::{ChapterList, PipelineSnapshot, Progress, SelectionStats, Step};
use tracing::{debug, warn};

use super::state::{SessionError, SessionState};

/// What applying a push did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Applied,
    /// Step slice replaced; the manager bumps its step epoch
    StepChanged,
    /// Server dropped the pipeline; state is back at the idle baseline
    ResetToIdle,
    /// Payload violated an invariant and was discarded; pull again
    NeedsReload,
    /// Nothing in the session view depends on this event
    Ignored,
}

/// Apply a pipeline state pull.
///
/// With `keep_step` the local step (and its progress) wins because a push
/// moved it while the pull was in flight.
pub fn apply_snapshot(state: &mut SessionState, snapshot: PipelineSnapshot, keep_step: bool) {
    if keep_step {
        debug!(
            pulled = %snapshot.step,
            local = %state.step,
            "Keeping pushed step over stale pull"
        );
    } else {
        state.step = snapshot.step;
        state.progress = snapshot.progress;
    }

    state.item_id = Some(snapshot.item_id);
    state.source_type = Some(snapshot.source_type);
    state.local_media_layout = snapshot.local_media_layout;
    state.selection_stats = consistent_stats(snapshot.selection_stats, None);
    state.can_undo = snapshot.can_undo;
    state.can_redo = snapshot.can_redo;
    state.book = snapshot.book;
    state.cue_sources = snapshot.cue_sources;
    state.restart_options = snapshot.restart_options;
}

/// Apply a chapter list pull
pub fn apply_chapter_list(state: &mut SessionState, list: ChapterList) {
    let ChapterList {
        chapters,
        selection_stats,
    } = list;
    let stats = consistent_stats(selection_stats, Some(&chapters));
    state.chapters = chapters;
    state.selection_stats = stats;
}

fn consistent_stats(
    stats: SelectionStats,
    chapters: Option<&[achew_common::models::Chapter]>,
) -> SelectionStats {
    if stats.is_consistent() {
        return stats;
    }
    warn!(?stats, "Inconsistent selection stats in pull");
    let derived = chapters.map(|list| {
        let total = list.len() as u32;
        let selected = list.iter().filter(|c| c.selected).count() as u32;
        (total, selected)
    });
    let (total, selected) = derived.unwrap_or((stats.total, stats.selected.min(stats.total)));
    SelectionStats::from_counts(total, selected).unwrap_or_default()
}

fn apply_chapter_update(state: &mut SessionState, update: &ChapterUpdateData) -> PushOutcome {
    let Some(stats) = update.selection_stats() else {
        warn!(
            total = update.total_count,
            selected = update.selected_count,
            "Discarding chapter update with impossible selection counts"
        );
        return PushOutcome::NeedsReload;
    };
    state.chapters = update.chapters.clone();
    state.selection_stats = stats;
    PushOutcome::Applied
}

/// Apply one push event to its slice
pub fn apply_push(state: &mut SessionState, event: &PushEvent) -> PushOutcome {
    match event {
        PushEvent::ProgressUpdate(data) => {
            state.progress = Progress {
                step: data.step,
                percent: data.percent,
                message: data.message.clone(),
                details: data.details.clone(),
            };
            PushOutcome::Applied
        }
        PushEvent::StepChange(data) => {
            if data.new_step == Step::Idle {
                state.reset_to_idle(None);
                return PushOutcome::ResetToIdle;
            }
            state.step = data.new_step;
            if let Some(options) = &data.restart_options {
                state.restart_options = options.clone();
            }
            if let Some(sources) = &data.cue_sources {
                state.cue_sources = sources.clone();
            }
            PushOutcome::StepChanged
        }
        PushEvent::ChapterUpdate(update) => apply_chapter_update(state, update),
        PushEvent::HistoryUpdate(data) => {
            state.can_undo = data.can_undo;
            state.can_redo = data.can_redo;
            PushOutcome::Applied
        }
        PushEvent::Status(data) => match data.book_update() {
            Some(book) => {
                state.book = Some(book.clone());
                PushOutcome::Applied
            }
            None => {
                debug!(kind = ?data.kind, message = ?data.message, "Status push");
                PushOutcome::Ignored
            }
        },
        PushEvent::Error(data) => {
            state.error = Some(SessionError {
                message: data.message.clone(),
                category: None,
            });
            PushOutcome::Applied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use achew_common::events::{HistoryData, ProgressData, StatusData, StepChangeData};
    use achew_common::models::{Book, Chapter, SourceType};
    use std::collections::BTreeMap;

    fn chapter(id: &str, timestamp: f64, selected: bool) -> Chapter {
        Chapter {
            id: id.to_string(),
            timestamp,
            current_title: format!("Chapter {}", id),
            asr_title: None,
            selected,
            realignment: None,
        }
    }

    fn snapshot(step: Step) -> PipelineSnapshot {
        PipelineSnapshot {
            item_id: "li_1".to_string(),
            source_type: SourceType::Abs,
            local_media_layout: None,
            step,
            progress: Progress::at(step),
            selection_stats: SelectionStats::from_counts(3, 2).unwrap(),
            can_undo: true,
            can_redo: false,
            book: Some(Book {
                id: None,
                title: "Dune".to_string(),
                author: None,
                duration: 7200.0,
                files: Vec::new(),
            }),
            cue_sources: Vec::new(),
            restart_options: vec![Step::ConfigureAsr, Step::SelectCueSource],
        }
    }

    #[test]
    fn test_snapshot_replaces_slice() {
        let mut state = SessionState::default();
        apply_snapshot(&mut state, snapshot(Step::ChapterEditing), false);

        assert_eq!(state.step, Step::ChapterEditing);
        assert_eq!(state.item_id.as_deref(), Some("li_1"));
        assert!(state.can_undo);
        assert_eq!(state.restart_options[0], Step::ConfigureAsr);
        assert_eq!(state.book.as_ref().map(|b| b.title.as_str()), Some("Dune"));
    }

    #[test]
    fn test_snapshot_keep_step_applies_everything_else() {
        let mut state = SessionState::default();
        state.step = Step::VadAnalysis;
        state.progress = Progress::at(Step::VadAnalysis);

        apply_snapshot(&mut state, snapshot(Step::AudioAnalysis), true);
        assert_eq!(state.step, Step::VadAnalysis);
        assert_eq!(state.progress.step, Step::VadAnalysis);
        assert!(state.book.is_some());
        assert_eq!(state.selection_stats.selected, 2);
    }

    #[test]
    fn test_chapter_update_idempotent() {
        let event = PushEvent::ChapterUpdate(ChapterUpdateData {
            chapters: vec![chapter("a", 0.0, true), chapter("b", 60.0, false)],
            total_count: 2,
            selected_count: 1,
            timestamp: None,
        });

        let mut state = SessionState::default();
        assert_eq!(apply_push(&mut state, &event), PushOutcome::Applied);
        let once = state.clone();
        assert_eq!(apply_push(&mut state, &event), PushOutcome::Applied);
        assert_eq!(state, once);
        assert_eq!(state.selection_stats.unselected, 1);
    }

    #[test]
    fn test_impossible_counts_discarded() {
        let mut state = SessionState::default();
        state.chapters = vec![chapter("a", 0.0, true)];
        state.selection_stats = SelectionStats::from_counts(1, 1).unwrap();
        let before = state.clone();

        let event = PushEvent::ChapterUpdate(ChapterUpdateData {
            chapters: vec![],
            total_count: 2,
            selected_count: 5,
            timestamp: None,
        });
        assert_eq!(apply_push(&mut state, &event), PushOutcome::NeedsReload);
        assert_eq!(state, before);
    }

    #[test]
    fn test_push_touches_only_named_slice() {
        let mut state = SessionState::default();
        apply_snapshot(&mut state, snapshot(Step::ChapterEditing), false);
        let before = state.clone();

        apply_push(
            &mut state,
            &PushEvent::HistoryUpdate(HistoryData {
                can_undo: false,
                can_redo: true,
            }),
        );
        assert!(!state.can_undo && state.can_redo);
        assert_eq!(state.step, before.step);
        assert_eq!(state.book, before.book);
        assert_eq!(state.restart_options, before.restart_options);

        let mut details = BTreeMap::new();
        details.insert("segment".to_string(), serde_json::json!(4));
        apply_push(
            &mut state,
            &PushEvent::ProgressUpdate(ProgressData {
                step: Step::AiCleanup,
                percent: 40.0,
                message: "Cleaning".to_string(),
                details,
            }),
        );
        assert_eq!(state.progress.percent, 40.0);
        assert_eq!(state.step, Step::ChapterEditing);
    }

    #[test]
    fn test_step_change_sideband() {
        let mut state = SessionState::default();
        state.restart_options = vec![Step::SelectCueSource];

        let outcome = apply_push(
            &mut state,
            &PushEvent::StepChange(StepChangeData {
                new_step: Step::ConfigureAsr,
                timestamp: None,
                restart_options: None,
                cue_sources: None,
            }),
        );
        assert_eq!(outcome, PushOutcome::StepChanged);
        assert_eq!(state.step, Step::ConfigureAsr);
        assert_eq!(state.restart_options, vec![Step::SelectCueSource]);

        apply_push(
            &mut state,
            &PushEvent::StepChange(StepChangeData {
                new_step: Step::ChapterEditing,
                timestamp: None,
                restart_options: Some(vec![Step::ConfigureAsr, Step::SelectCueSource]),
                cue_sources: None,
            }),
        );
        assert_eq!(state.restart_options.len(), 2);
    }

    #[test]
    fn test_step_change_to_idle_resets() {
        let mut state = SessionState::default();
        apply_snapshot(&mut state, snapshot(Step::Completed), false);
        state.source_mode = Some(SourceType::Abs);

        let outcome = apply_push(
            &mut state,
            &PushEvent::StepChange(StepChangeData {
                new_step: Step::Idle,
                timestamp: None,
                restart_options: None,
                cue_sources: None,
            }),
        );
        assert_eq!(outcome, PushOutcome::ResetToIdle);
        assert!(state.item_id.is_none());
        assert_eq!(state.source_mode, Some(SourceType::Abs));
    }

    #[test]
    fn test_status_book_update() {
        let mut state = SessionState::default();
        let plain = PushEvent::Status(StatusData {
            kind: Some("info".to_string()),
            message: Some("hello".to_string()),
            step: None,
            book: None,
        });
        assert_eq!(apply_push(&mut state, &plain), PushOutcome::Ignored);

        let update = PushEvent::Status(StatusData {
            kind: Some(StatusData::BOOK_UPDATE.to_string()),
            message: None,
            step: None,
            book: snapshot(Step::Idle).book,
        });
        assert_eq!(apply_push(&mut state, &update), PushOutcome::Applied);
        assert_eq!(state.book.as_ref().map(|b| b.duration), Some(7200.0));
    }

    #[test]
    fn test_pull_stats_recomputed_when_inconsistent() {
        let mut state = SessionState::default();
        apply_chapter_list(
            &mut state,
            ChapterList {
                chapters: vec![chapter("a", 0.0, true), chapter("b", 5.0, false)],
                selection_stats: SelectionStats {
                    total: 2,
                    selected: 2,
                    unselected: 2,
                },
            },
        );
        assert_eq!(state.selection_stats, SelectionStats::from_counts(2, 1).unwrap());
    }
}
