//! Sequential execution of a merge plan.
//!
//! Muxing is I/O- and CPU-bound, so tasks run strictly one at a time;
//! probing parallelism lives in the scanner instead. A task failure never
//! halts the run. Cancellation is cooperative and checked between tasks,
//! never mid-muxer-call.

use crate::models::{MergeOutcome, MergePlan, MergeTask, RunSummary};
use crate::planner;
use chrono::Utc;
use providers::MediaMuxer;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Fired exactly once per task, in completion order, with
/// `(completed_count, total_count, outcome)`.
pub type ProgressFn<'a> = dyn FnMut(usize, usize, &MergeOutcome) + Send + 'a;

pub struct TaskExecutor<'a> {
    muxer: &'a dyn MediaMuxer,
    cancel: Arc<AtomicBool>,
}

impl<'a> TaskExecutor<'a> {
    pub fn new(muxer: &'a dyn MediaMuxer) -> Self {
        Self::with_cancel(muxer, Arc::new(AtomicBool::new(false)))
    }

    pub fn with_cancel(muxer: &'a dyn MediaMuxer, cancel: Arc<AtomicBool>) -> Self {
        Self { muxer, cancel }
    }

    /// Shared flag that stops the run before the next task when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub async fn execute(&self, plan: &MergePlan, progress: &mut ProgressFn<'_>) -> RunSummary {
        let total = plan.tasks.len();
        let mut summary = RunSummary::begin(total);
        for (done, task) in plan.tasks.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                summary.cancelled = true;
                info!(completed = done, total, "run cancelled, remaining tasks skipped");
                break;
            }
            // The plan-time reservation is only best effort; the directory
            // may have changed since, including by earlier tasks.
            let output = planner::unique_path(&task.planned_output, &|p| p.exists());
            let outcome = self.run_task(task, &output, plan).await;
            if outcome.success && plan.delete_sources {
                delete_source(&task.pair.video.path);
                delete_source(&task.pair.audio.path);
            }
            summary.record(outcome.clone());
            progress(done + 1, total, &outcome);
        }
        summary.finished_at = Some(Utc::now());
        summary
    }

    async fn run_task(&self, task: &MergeTask, output: &Path, plan: &MergePlan) -> MergeOutcome {
        let started_at = Utc::now();
        let video = &task.pair.video.path;
        let audio = &task.pair.audio.path;
        let mut retry_count = 0u32;
        let mut error = None;
        loop {
            match self
                .muxer
                .merge(video, audio, output, plan.copy_streams_only)
                .await
            {
                Ok(()) => {
                    error = None;
                    break;
                }
                Err(e) => {
                    error = Some(e.to_string());
                    if retry_count >= plan.max_retries {
                        break;
                    }
                    retry_count += 1;
                    warn!(
                        task = task.index,
                        attempt = retry_count,
                        error = %e,
                        "merge failed, retrying"
                    );
                }
            }
        }
        MergeOutcome {
            success: error.is_none(),
            video_path: video.clone(),
            audio_path: audio.clone(),
            output_path: output.to_path_buf(),
            error,
            retry_count,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

fn delete_source(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to delete source after merge");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchedPair, MediaItem};
    use providers::stub::StubMuxer;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn media_item(path: &Path, has_video: bool) -> MediaItem {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        MediaItem {
            path: path.to_path_buf(),
            base_name: crate::naming::base_name(&display_name),
            display_name,
            duration_secs: 120.0,
            has_video,
            has_audio: !has_video,
            width: 0,
            height: 0,
            size_mb: 1.0,
        }
    }

    fn plan_for(dir: &Path, pairs: usize, max_retries: u32, delete_sources: bool) -> MergePlan {
        let mut tasks = Vec::new();
        for i in 1..=pairs {
            let video = dir.join(format!("clip{i}_video.mp4"));
            let audio = dir.join(format!("clip{i}_audio.m4a"));
            fs::write(&video, b"v").unwrap();
            fs::write(&audio, b"a").unwrap();
            tasks.push(crate::models::MergeTask {
                index: i,
                pair: MatchedPair {
                    video: media_item(&video, true),
                    audio: media_item(&audio, false),
                    confidence: 1.0,
                },
                planned_output: dir.join(format!("out{i}.mp4")),
            });
        }
        MergePlan {
            tasks,
            delete_sources,
            copy_streams_only: true,
            max_retries,
        }
    }

    #[tokio::test]
    async fn successful_run_records_one_outcome_per_task() {
        let temp = tempfile::tempdir().unwrap();
        let plan = plan_for(temp.path(), 2, 2, false);
        let muxer = StubMuxer::succeeding();
        let mut seen = Vec::new();
        let summary = TaskExecutor::new(&muxer)
            .execute(&plan, &mut |done, total, outcome| {
                seen.push((done, total, outcome.success))
            })
            .await;
        assert_eq!((summary.total, summary.succeeded, summary.failed), (2, 2, 0));
        assert!(summary.is_complete());
        assert!(!summary.cancelled);
        assert_eq!(seen, vec![(1, 2, true), (2, 2, true)]);
        assert!(temp.path().join("out1.mp4").exists());
        assert!(temp.path().join("out2.mp4").exists());
    }

    #[tokio::test]
    async fn failing_twice_then_succeeding_counts_retries() {
        let temp = tempfile::tempdir().unwrap();
        let plan = plan_for(temp.path(), 1, 2, false);
        let muxer = StubMuxer::failing_times(2);
        let summary = TaskExecutor::new(&muxer)
            .execute(&plan, &mut |_, _, _| {})
            .await;
        assert_eq!(summary.succeeded, 1);
        let outcome = &summary.outcomes[0];
        assert!(outcome.success);
        assert_eq!(outcome.retry_count, 2);
        assert!(outcome.error.is_none());
        assert_eq!(muxer.calls().len(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_task_but_not_the_run() {
        let temp = tempfile::tempdir().unwrap();
        let plan = plan_for(temp.path(), 2, 2, false);
        let muxer = StubMuxer::failing();
        let summary = TaskExecutor::new(&muxer)
            .execute(&plan, &mut |_, _, _| {})
            .await;
        assert_eq!((summary.succeeded, summary.failed), (0, 2));
        assert!(summary.is_complete());
        for outcome in &summary.outcomes {
            assert!(!outcome.success);
            assert_eq!(outcome.retry_count, 2);
            assert!(outcome.error.is_some());
        }
        // 3 attempts per task, and the second task still ran.
        assert_eq!(muxer.calls().len(), 6);
    }

    #[tokio::test]
    async fn collision_is_rechecked_at_execution_time() {
        let temp = tempfile::tempdir().unwrap();
        let plan = plan_for(temp.path(), 1, 0, false);
        fs::write(temp.path().join("out1.mp4"), b"earlier run").unwrap();
        let muxer = StubMuxer::succeeding();
        let summary = TaskExecutor::new(&muxer)
            .execute(&plan, &mut |_, _, _| {})
            .await;
        let outcome = &summary.outcomes[0];
        assert_eq!(outcome.output_path, temp.path().join("out1_1.mp4"));
        assert!(outcome.output_path.exists());
        assert_eq!(
            fs::read(temp.path().join("out1.mp4")).unwrap(),
            b"earlier run"
        );
    }

    #[tokio::test]
    async fn sources_are_deleted_only_after_success() {
        let temp = tempfile::tempdir().unwrap();
        let plan = plan_for(temp.path(), 1, 0, true);
        let video = plan.tasks[0].pair.video.path.clone();
        let audio = plan.tasks[0].pair.audio.path.clone();

        let summary = TaskExecutor::new(&StubMuxer::failing())
            .execute(&plan, &mut |_, _, _| {})
            .await;
        assert_eq!(summary.failed, 1);
        assert!(video.exists() && audio.exists());

        let summary = TaskExecutor::new(&StubMuxer::succeeding())
            .execute(&plan, &mut |_, _, _| {})
            .await;
        assert_eq!(summary.succeeded, 1);
        assert!(!video.exists() && !audio.exists());
    }

    #[tokio::test]
    async fn deletion_failure_does_not_flip_the_outcome() {
        let temp = tempfile::tempdir().unwrap();
        let mut plan = plan_for(temp.path(), 1, 0, true);
        // Point the pair at sources that no longer exist.
        let missing = temp.path().join("gone.mp4");
        plan.tasks[0].pair.video.path = missing.clone();
        plan.tasks[0].pair.audio.path = temp.path().join("gone.m4a");
        let summary = TaskExecutor::new(&StubMuxer::succeeding())
            .execute(&plan, &mut |_, _, _| {})
            .await;
        assert_eq!(summary.succeeded, 1);
        assert!(summary.outcomes[0].success);
    }

    #[tokio::test]
    async fn cancelled_run_returns_the_partial_summary() {
        let temp = tempfile::tempdir().unwrap();
        let plan = plan_for(temp.path(), 3, 0, false);
        let muxer = StubMuxer::succeeding();
        let executor = TaskExecutor::new(&muxer);
        let cancel = executor.cancel_flag();
        let mut fired = 0usize;
        let summary = executor
            .execute(&plan, &mut |done, _, _| {
                fired += 1;
                if done == 1 {
                    cancel.store(true, Ordering::SeqCst);
                }
            })
            .await;
        assert!(summary.cancelled);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(fired, 1);
        assert!(!summary.is_complete());
    }
}
