use anyhow::{Context, Result};
use std::sync::{Arc, Mutex, TryLockError};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    db::{Database, MonitoringStatus},
    monitor::MonitorSession,
    persistence::{frame_path, PersistJob, PersistenceWriter},
    productivity::FrameReference,
    tracking::{ClosureEvent, Observation},
};

use super::capture::{Capture, CaptureRig, Frame};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub type SharedRig = Arc<Mutex<CaptureRig>>;
pub type ActiveSession = Arc<tokio::sync::Mutex<Option<MonitorSession>>>;

/// What one monitoring loop needs; cloned out of the controller on start.
#[derive(Clone)]
pub struct LoopContext {
    pub session_id: String,
    pub config: EngineConfig,
    pub rig: SharedRig,
    pub active: ActiveSession,
    pub db: Database,
    pub writer: PersistenceWriter,
}

enum TickOutcome {
    Continue,
    Stop(MonitoringStatus),
}

pub async fn monitoring_loop(ctx: LoopContext, cancel_token: CancellationToken) {
    let monitor = &ctx.config.monitor;
    let mut ticker = tokio::time::interval(Duration::from_millis(monitor.tick_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let capture_timeout = Duration::from_millis(monitor.capture_timeout_ms.max(1));

    log_info!("monitoring loop started for session {}", ctx.session_id);

    let status = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(capture) = capture_frame(&ctx.rig, capture_timeout).await else {
                    continue;
                };
                if let TickOutcome::Stop(status) = process_capture(&ctx, capture).await {
                    break status;
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("monitoring loop shutting down");
                break MonitoringStatus::Completed;
            }
        }
    };

    if let Err(err) = finalize(&ctx, status).await {
        log_error!("failed to finalize monitoring session {}: {err:?}", ctx.session_id);
    }
}

/// Grab one frame on a blocking thread. A rig busy with recognition skips
/// the tick rather than queueing behind it.
async fn capture_frame(rig: &SharedRig, timeout: Duration) -> Option<Capture> {
    let rig = Arc::clone(rig);
    let job = tokio::task::spawn_blocking(move || -> Result<Option<Capture>> {
        match rig.try_lock() {
            Ok(mut guard) => guard.capture().map(Some),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().capture().map(Some),
        }
    });

    match tokio::time::timeout(timeout, job).await {
        Ok(Ok(Ok(Some(capture)))) => Some(capture),
        Ok(Ok(Ok(None))) => {
            log_debug!("capture rig busy, skipping tick");
            None
        }
        Ok(Ok(Err(err))) => {
            log_error!("capture failed: {err:?}");
            None
        }
        Ok(Err(join_err)) => {
            log_error!("capture worker join failed: {join_err}");
            None
        }
        Err(_) => {
            log_warn!("capture timeout (> {}ms)", timeout.as_millis());
            None
        }
    }
}

async fn process_capture(ctx: &LoopContext, capture: Capture) -> TickOutcome {
    let now = capture.frame.captured_at;
    let observation = match Observation::from_landmarks(capture.landmarks.as_deref()) {
        Ok(observation) => observation,
        Err(err) => {
            log_warn!("rejected landmark mesh: {err}");
            return TickOutcome::Continue;
        }
    };

    let monitor = &ctx.config.monitor;
    let mut guard = ctx.active.lock().await;
    let Some(session) = guard
        .as_mut()
        .filter(|s| s.session_id() == ctx.session_id && s.ended().is_none())
    else {
        return TickOutcome::Stop(MonitoringStatus::Completed);
    };

    let report = session.apply(observation, now);
    if !report.flushed.is_empty() {
        dispatch_flushed(ctx, session, &report.flushed, Some(&capture.frame));
    }
    if report.calibrated_now {
        log_info!(
            "session {} calibrated at threshold {:.3}",
            ctx.session_id,
            report.threshold.unwrap_or_default()
        );
    }

    if session.ticks() % u64::from(monitor.heartbeat_every_ticks.max(1)) == 0 {
        let row = session.row();
        let db = ctx.db.clone();
        tokio::spawn(async move {
            if let Err(err) = db
                .update_monitoring_progress(&row.id, row.ticks, row.total_closed_secs, row.productivity_score, now)
                .await
            {
                log_warn!("heartbeat for session {} failed: {err:?}", row.id);
            }
        });
    }

    if let Some(absent) = session.absent_for(now) {
        if absent >= chrono::Duration::seconds(monitor.absence_timeout_secs as i64) {
            log_info!("subject lost for {}s, ending session {}", absent.num_seconds(), ctx.session_id);
            return TickOutcome::Stop(MonitoringStatus::SubjectLost);
        }
    }
    if session.elapsed(now) >= chrono::Duration::seconds(monitor.max_session_secs as i64) {
        log_info!("session {} reached its {}s cap", ctx.session_id, monitor.max_session_secs);
        return TickOutcome::Stop(MonitoringStatus::TimedOut);
    }

    TickOutcome::Continue
}

/// Queue durable writes for closures already folded into `session`.
fn dispatch_flushed(ctx: &LoopContext, session: &mut MonitorSession, events: &[ClosureEvent], frame: Option<&Frame>) {
    let employee_id = session.employee_id();
    for event in events {
        log_info!(
            "closure {:.2}s ({} -> {}) for employee {employee_id}",
            event.duration_secs,
            event.start.format("%H:%M:%S%.3f"),
            event.end.format("%H:%M:%S%.3f")
        );
        ctx.writer.submit(PersistJob::Closure {
            identity_id: employee_id,
            session_id: Some(ctx.session_id.clone()),
            event: event.clone(),
        });
    }

    let storage = &ctx.config.storage;
    if let Some(frame) = frame.filter(|_| storage.save_frames) {
        let path = frame_path(&storage.frame_dir, employee_id, frame.captured_at);
        session.push_frame_reference(FrameReference {
            captured_at: frame.captured_at,
            path: path.clone(),
        });
        ctx.writer.submit(PersistJob::Frame {
            identity_id: employee_id,
            image: frame.image.clone(),
            path,
            captured_at: frame.captured_at,
        });
    }
}

/// Flush the open closure, drain queued writes and close the session row.
async fn finalize(ctx: &LoopContext, status: MonitoringStatus) -> Result<()> {
    let row = {
        let mut guard = ctx.active.lock().await;
        let Some(session) = guard
            .as_mut()
            .filter(|s| s.session_id() == ctx.session_id && s.ended().is_none())
        else {
            return Ok(());
        };
        let now = session.last_tick_at();
        let flushed = session.finish(status, now);
        dispatch_flushed(ctx, session, &flushed, None);
        session.row()
    };

    if let Err(err) = ctx.writer.flush().await {
        log_warn!("pending writes for session {} not confirmed: {err:?}", row.id);
    }
    ctx.db
        .finish_monitoring_session(&row)
        .await
        .context("failed to close monitoring session row")?;

    log_info!(
        "monitoring session {} ended as {} after {} ticks, score {:.1}",
        row.id,
        row.status.as_str(),
        row.ticks,
        row.productivity_score
    );
    Ok(())
}
