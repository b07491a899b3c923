use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::{info, warn};
use tokio::sync::{Mutex, RwLock};

use crate::{
    config::EngineConfig,
    db::{Database, MonitoringSession, MonitoringStatus},
    identity::{recognize, Gallery, Identified, IdentityMatcher, RecognitionOutcome, RecognitionParams},
    persistence::{DeliveryStats, PersistJob, PersistenceWriter},
    productivity::ProductivityRecord,
    sensing::{ActiveSession, CaptureRig, Embedder, LoopContext, SensingController, SharedRig},
};

use super::session::{MonitorSession, StatsSnapshot};

/// Front door of the engine: enrolment, recognition and the lifecycle of
/// the single monitored subject.
#[derive(Clone)]
pub struct MonitorController {
    config: EngineConfig,
    db: Database,
    writer: PersistenceWriter,
    rig: SharedRig,
    embedder: Arc<StdMutex<Box<dyn Embedder>>>,
    gallery: Arc<RwLock<Gallery>>,
    matcher: IdentityMatcher,
    active: ActiveSession,
    sensing: Arc<Mutex<SensingController>>,
}

impl MonitorController {
    /// Validates `config`, closes sessions a crash left running and loads the
    /// gallery. Must be called inside a tokio runtime.
    pub async fn new(
        config: EngineConfig,
        db: Database,
        rig: CaptureRig,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self> {
        config.validate().context("invalid engine configuration")?;

        let recovered = db.recover_interrupted_sessions().await?;
        for session_id in &recovered {
            warn!("Recovered incomplete monitoring session {session_id}; marked as Interrupted");
        }

        let gallery = db.load_gallery().await?;
        info!("Loaded gallery with {} known identities", gallery.len());

        let (writer, _worker) = PersistenceWriter::spawn(db.clone());

        Ok(Self {
            matcher: IdentityMatcher::new(config.matching),
            config,
            db,
            writer,
            rig: Arc::new(StdMutex::new(rig)),
            embedder: Arc::new(StdMutex::new(embedder)),
            gallery: Arc::new(RwLock::new(gallery)),
            active: Arc::new(Mutex::new(None)),
            sensing: Arc::new(Mutex::new(SensingController::new())),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Persist a new identity and make it matchable immediately.
    pub async fn enroll(&self, name: &str, embedding: &[f32], face_image_path: Option<&str>) -> Result<i64> {
        let mut gallery = self.gallery.write().await;
        // Check against the gallery first so a bad embedding never reaches the table.
        let mut candidate = gallery.clone();
        candidate.insert(name, 0, embedding)?;

        let employee_id = self.db.add_employee(name, embedding, face_image_path).await?;
        gallery.insert(name, employee_id, embedding)?;
        info!("Enrolled {name} as employee {employee_id}");
        Ok(employee_id)
    }

    pub async fn remove_employee(&self, employee_id: i64) -> Result<()> {
        let monitored = {
            let guard = self.active.lock().await;
            guard
                .as_ref()
                .is_some_and(|s| s.employee_id() == employee_id && s.ended().is_none())
        };
        if monitored {
            self.stop_monitoring().await?;
        }

        self.db.delete_employee(employee_id).await?;
        self.gallery.write().await.remove_employee(employee_id);
        Ok(())
    }

    /// Look for a known face within the recognition budget. On success the
    /// recognized subject replaces whoever was being monitored.
    pub async fn identify(&self) -> Result<RecognitionOutcome> {
        let monitor = &self.config.monitor;
        let params = RecognitionParams {
            budget: Duration::from_secs(monitor.recognition_budget_secs),
            frame_skip: monitor.recognition_frame_skip,
            crop_margin: monitor.face_crop_margin,
        };
        let gallery = self.gallery.read().await.clone();
        let matcher = self.matcher;
        let rig = Arc::clone(&self.rig);
        let embedder = Arc::clone(&self.embedder);

        let outcome = tokio::task::spawn_blocking(move || -> Result<RecognitionOutcome> {
            let mut rig = rig.lock().map_err(|_| anyhow!("capture rig lock poisoned"))?;
            let mut embedder = embedder
                .lock()
                .map_err(|_| anyhow!("embedder lock poisoned"))?;
            recognize(&mut rig, &mut **embedder, &gallery, &matcher, params)
        })
        .await
        .context("recognition worker join failed")??;

        if let RecognitionOutcome::Identified(who) = &outcome {
            self.start_monitoring(who).await?;
        }
        Ok(outcome)
    }

    /// Begin monitoring `identity`, ending any session already running.
    pub async fn start_monitoring(&self, identity: &Identified) -> Result<StatsSnapshot> {
        if self.is_monitoring().await {
            self.stop_monitoring().await?;
        }

        let row = MonitoringSession::start(identity.employee_id, Utc::now());
        self.db.insert_monitoring_session(&row).await?;
        let session_id = row.id.clone();

        let snapshot = {
            let mut guard = self.active.lock().await;
            let session = MonitorSession::new(&self.config, row, identity.name.clone());
            let snapshot = session.snapshot(self.writer.stats());
            *guard = Some(session);
            snapshot
        };

        let ctx = LoopContext {
            session_id,
            config: self.config.clone(),
            rig: Arc::clone(&self.rig),
            active: Arc::clone(&self.active),
            db: self.db.clone(),
            writer: self.writer.clone(),
        };
        self.sensing.lock().await.start_sensing(ctx)?;

        info!(
            "Monitoring {} (employee {}) in session {}",
            identity.name, identity.employee_id, snapshot.session_id
        );
        Ok(snapshot)
    }

    /// End the current session (or collect one that ended on its own) and
    /// return its final record.
    pub async fn stop_monitoring(&self) -> Result<ProductivityRecord> {
        if let Err(err) = self.sensing.lock().await.stop_sensing().await {
            warn!("Monitoring loop ended abnormally: {err:?}");
        }

        let Some(mut session) = self.active.lock().await.take() else {
            bail!("no active monitoring session");
        };

        // A loop that never ran its finalizer leaves the session open.
        if session.ended().is_none() {
            let now = session.last_tick_at();
            let employee_id = session.employee_id();
            for event in session.finish(MonitoringStatus::Completed, now) {
                self.writer.submit(PersistJob::Closure {
                    identity_id: employee_id,
                    session_id: Some(session.session_id().to_string()),
                    event,
                });
            }
            if let Err(err) = self.writer.flush().await {
                warn!("Pending writes for session {} not confirmed: {err:?}", session.session_id());
            }
            let row = session.row();
            if let Err(err) = self.db.finish_monitoring_session(&row).await {
                warn!("Failed to close monitoring session {}: {err:?}", row.id);
            }
        }

        Ok(session.record().clone())
    }

    pub async fn is_monitoring(&self) -> bool {
        self.sensing.lock().await.is_active()
    }

    /// Consistent view of the current (or just-ended) session.
    pub async fn stats(&self) -> Option<StatsSnapshot> {
        let delivery = self.writer.stats();
        let guard = self.active.lock().await;
        guard.as_ref().map(|session| session.snapshot(delivery))
    }

    pub fn delivery_stats(&self) -> DeliveryStats {
        self.writer.stats()
    }

    pub async fn known_identities(&self) -> usize {
        self.gallery.read().await.len()
    }
}
