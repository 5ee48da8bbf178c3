//! Integration tests for the full job pipeline.
//!
//! Tests: Event → Orchestrator → Run → Job function → Records / Worker
//!
//! Verifies:
//! - Records move through their statuses in order and end in the right state
//! - Worker payloads carry exactly the fields of the requested format
//! - Retries stop at the policy bound and the compensator fires once
//! - Delayed follow-up events wait for their time

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::{Value, json};

    use carrion_core::{
        CaseId, CaseRecord, ExportId, JobRecord, JobStatus, RecordKey, RunId, SessionId,
        SessionRecord, SessionState, Transition, UploadId, UserId, UserRecord,
    };
    use carrion_events::{
        AccountDeletionConfirmed, EventEnvelope, ImageExportFormat, ImageExportRequested,
        PasswordProtection, RecalculationRequested, SessionDelete, SessionTrack,
        SessionTriggerCleanup,
    };

    use crate::config::JobSettings;
    use crate::functions::compensate::JOB_FAILED;
    use crate::functions::{self, JobDeps};
    use crate::jobs::{
        InMemoryRunStore, JobFunction, Orchestrator, Run, RunStats, RunStatus, RunStore,
    };
    use crate::records::{InMemoryRecordStore, RecordStore, RecordStoreError};
    use crate::worker::{
        ComputeWorker, ExportRequest, RecalculateRequest, WorkerAck, WorkerError,
    };

    // ---- scripted worker -------------------------------------------------

    /// Answers from a script, then succeeds. Every request is recorded.
    #[derive(Default)]
    struct ScriptedWorker {
        script: Mutex<VecDeque<WorkerError>>,
        recalculations: Mutex<Vec<RecalculateRequest>>,
        exports: Mutex<Vec<Value>>,
    }

    impl ScriptedWorker {
        fn failing(times: usize, error: WorkerError) -> Self {
            let worker = Self::default();
            worker
                .script
                .lock()
                .unwrap()
                .extend(std::iter::repeat_n(error, times));
            worker
        }

        fn respond(&self) -> Result<WorkerAck, WorkerError> {
            match self.script.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(WorkerAck { status: 200 }),
            }
        }

        fn recalculations(&self) -> usize {
            self.recalculations.lock().unwrap().len()
        }

        fn exports(&self) -> Vec<Value> {
            self.exports.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ComputeWorker for ScriptedWorker {
        async fn recalculate(&self, request: &RecalculateRequest) -> Result<WorkerAck, WorkerError> {
            self.recalculations.lock().unwrap().push(request.clone());
            self.respond()
        }

        async fn export(&self, request: &ExportRequest) -> Result<WorkerAck, WorkerError> {
            self.exports
                .lock()
                .unwrap()
                .push(serde_json::to_value(request).unwrap());
            self.respond()
        }
    }

    fn server_error(body: &str) -> WorkerError {
        WorkerError::Status {
            endpoint: "/v1/computation/recalculate".into(),
            status: 500,
            body: body.into(),
        }
    }

    // ---- log capture -----------------------------------------------------

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogCapture {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .matches(needle)
                .count()
        }
    }

    /// Capture log output of the current thread until the guard drops.
    fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    // ---- harness ---------------------------------------------------------

    struct Harness {
        orchestrator: Orchestrator,
        runs: Arc<InMemoryRunStore>,
        records: Arc<InMemoryRecordStore>,
        worker: Arc<ScriptedWorker>,
    }

    /// Retries without backoff and no delays between lifecycle stages.
    fn immediate() -> JobSettings {
        JobSettings {
            retry_base_delay: Duration::ZERO,
            account_deletion_grace: Duration::ZERO,
            session_inactivity_timeout: Duration::ZERO,
            session_deletion_grace: Duration::ZERO,
            ..JobSettings::default()
        }
    }

    fn harness(settings: JobSettings, worker: ScriptedWorker) -> Harness {
        let records = Arc::new(InMemoryRecordStore::new());
        harness_with(settings, worker, records.clone(), records)
    }

    fn harness_with(
        settings: JobSettings,
        worker: ScriptedWorker,
        records: Arc<InMemoryRecordStore>,
        view: Arc<dyn RecordStore>,
    ) -> Harness {
        let worker = Arc::new(worker);
        let runs = InMemoryRunStore::arc();
        let registry = functions::registry(JobDeps::new(view, worker.clone(), settings));
        Harness {
            orchestrator: Orchestrator::new(runs.clone(), registry),
            runs,
            records,
            worker,
        }
    }

    fn case_id(id: &str) -> CaseId {
        CaseId::new(id).unwrap()
    }

    impl Harness {
        async fn seed_case(&self, id: &str) -> RecordKey {
            let case = case_id(id);
            self.records
                .upsert_case(CaseRecord::new(case.clone(), true, Utc::now()))
                .await
                .unwrap();
            self.records
                .insert_job_record(JobRecord::analysis(case.clone(), Utc::now()))
                .await
                .unwrap();
            RecordKey::analysis(&case)
        }

        async fn record(&self, key: &RecordKey) -> JobRecord {
            self.records.job_record(key).await.unwrap().unwrap()
        }

        async fn recalculate(&self, id: &str) -> RunId {
            let receipt = self
                .orchestrator
                .send(RecalculationRequested { case_id: case_id(id) })
                .await
                .unwrap();
            assert_eq!(receipt.run_ids.len(), 1);
            receipt.run_ids[0]
        }
    }

    // ---- recalculation ---------------------------------------------------

    #[tokio::test]
    async fn recalculation_completes_and_clears_flag() {
        let h = harness(immediate(), ScriptedWorker::default());
        let key = h.seed_case("case-1").await;

        let run_id = h.recalculate("case-1").await;
        h.orchestrator.run_until_idle().await.unwrap();

        let record = h.record(&key).await;
        assert_eq!(record.status(), JobStatus::Completed);
        assert_eq!(record.run_id(), Some(run_id));
        let case = h.records.case(&case_id("case-1")).await.unwrap().unwrap();
        assert!(!case.recalculation_needed);

        assert_eq!(h.worker.recalculations(), 1);
        assert_eq!(
            h.records.status_history(&key),
            [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
        );
        let run = h.orchestrator.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn persistent_worker_failure_fails_record_once() {
        let (logs, _guard) = capture_logs();
        let h = harness(immediate(), ScriptedWorker::failing(10, server_error("pmi model crashed")));
        let key = h.seed_case("case-1").await;

        let run_id = h.recalculate("case-1").await;
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 3);

        assert_eq!(h.worker.recalculations(), 3);
        let record = h.record(&key).await;
        assert_eq!(record.status(), JobStatus::Failed);
        assert!(record.failure_reason().unwrap().contains("pmi model crashed"));
        assert_eq!(
            h.records.status_history(&key),
            [JobStatus::Pending, JobStatus::Processing, JobStatus::Failed]
        );

        assert_eq!(logs.count(JOB_FAILED), 1);
        assert_eq!(logs.count("marked_failed"), 1);

        let dead = h.orchestrator.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].run.id, run_id);
        assert!(matches!(
            dead[0].run.status,
            RunStatus::DeadLettered { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_budget() {
        let h = harness(immediate(), ScriptedWorker::failing(2, server_error("busy")));
        let key = h.seed_case("case-1").await;

        let run_id = h.recalculate("case-1").await;
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 3);

        assert_eq!(h.record(&key).await.status(), JobStatus::Completed);
        let run = h.orchestrator.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.history.len(), 3);
        assert!(run.history[2].success);
        // `begin_job` ran once: retries answer `mark-processing` from the memo.
        assert_eq!(
            h.records.status_history(&key),
            [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
        );
    }

    #[tokio::test]
    async fn client_error_skips_remaining_attempts() {
        let rejected = WorkerError::Status {
            endpoint: "/v1/computation/recalculate".into(),
            status: 422,
            body: "case has no uploads".into(),
        };
        let h = harness(immediate(), ScriptedWorker::failing(10, rejected));
        let key = h.seed_case("case-1").await;

        h.recalculate("case-1").await;
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 1);

        assert_eq!(h.worker.recalculations(), 1);
        let record = h.record(&key).await;
        assert_eq!(record.status(), JobStatus::Failed);
        assert!(record.failure_reason().unwrap().contains("case has no uploads"));
    }

    #[tokio::test]
    async fn missing_record_fails_without_calling_worker() {
        let (logs, _guard) = capture_logs();
        let h = harness(immediate(), ScriptedWorker::default());

        h.recalculate("ghost").await;
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 1);

        assert_eq!(h.worker.recalculations(), 0);
        assert_eq!(logs.count(JOB_FAILED), 1);
        assert_eq!(h.orchestrator.dead_letters(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replay_reopens_failed_record_under_a_new_run() {
        let h = harness(immediate(), ScriptedWorker::failing(3, server_error("down")));
        let key = h.seed_case("case-1").await;

        let first = h.recalculate("case-1").await;
        h.orchestrator.run_until_idle().await.unwrap();
        assert_eq!(h.record(&key).await.status(), JobStatus::Failed);

        let replayed = h.orchestrator.replay(first).await.unwrap();
        h.orchestrator.run_until_idle().await.unwrap();

        let record = h.record(&key).await;
        assert_eq!(record.status(), JobStatus::Completed);
        assert_eq!(record.run_id(), Some(replayed.id));
        assert_eq!(
            h.records.status_history(&key),
            [
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::Failed,
                JobStatus::Processing,
                JobStatus::Completed,
            ]
        );
        assert_eq!(h.worker.recalculations(), 4);
    }

    /// Record store whose recalculation-flag write fails a few times.
    struct FlakyFinalize {
        inner: Arc<InMemoryRecordStore>,
        failures: Mutex<u32>,
    }

    #[async_trait]
    impl RecordStore for FlakyFinalize {
        async fn job_record(&self, key: &RecordKey) -> Result<Option<JobRecord>, RecordStoreError> {
            self.inner.job_record(key).await
        }

        async fn insert_job_record(&self, record: JobRecord) -> Result<(), RecordStoreError> {
            self.inner.insert_job_record(record).await
        }

        async fn delete_job_record(&self, key: &RecordKey) -> Result<bool, RecordStoreError> {
            self.inner.delete_job_record(key).await
        }

        async fn begin_job(&self, key: &RecordKey, run_id: RunId) -> Result<Transition, RecordStoreError> {
            self.inner.begin_job(key, run_id).await
        }

        async fn complete_job(&self, key: &RecordKey) -> Result<Transition, RecordStoreError> {
            self.inner.complete_job(key).await
        }

        async fn fail_job(
            &self,
            key: &RecordKey,
            run_id: RunId,
            reason: &str,
        ) -> Result<Transition, RecordStoreError> {
            self.inner.fail_job(key, run_id, reason).await
        }

        async fn case(&self, id: &CaseId) -> Result<Option<CaseRecord>, RecordStoreError> {
            self.inner.case(id).await
        }

        async fn upsert_case(&self, case: CaseRecord) -> Result<(), RecordStoreError> {
            self.inner.upsert_case(case).await
        }

        async fn clear_recalculation_flag(&self, id: &CaseId) -> Result<bool, RecordStoreError> {
            {
                let mut left = self.failures.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    return Err(RecordStoreError::Storage("connection reset".into()));
                }
            }
            self.inner.clear_recalculation_flag(id).await
        }

        async fn user(&self, id: &UserId) -> Result<Option<UserRecord>, RecordStoreError> {
            self.inner.user(id).await
        }

        async fn upsert_user(&self, user: UserRecord) -> Result<(), RecordStoreError> {
            self.inner.upsert_user(user).await
        }

        async fn delete_user(&self, id: &UserId) -> Result<u64, RecordStoreError> {
            self.inner.delete_user(id).await
        }

        async fn session(&self, id: &SessionId) -> Result<Option<SessionRecord>, RecordStoreError> {
            self.inner.session(id).await
        }

        async fn upsert_session(&self, session: SessionRecord) -> Result<(), RecordStoreError> {
            self.inner.upsert_session(session).await
        }

        async fn delete_session(&self, id: &SessionId) -> Result<bool, RecordStoreError> {
            self.inner.delete_session(id).await
        }

        async fn idle_sessions(
            &self,
            idle_before: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<SessionRecord>, RecordStoreError> {
            self.inner.idle_sessions(idle_before, limit).await
        }
    }

    #[tokio::test]
    async fn worker_is_not_called_again_when_a_later_step_fails() {
        let records = Arc::new(InMemoryRecordStore::new());
        let view = Arc::new(FlakyFinalize {
            inner: records.clone(),
            failures: Mutex::new(2),
        });
        let h = harness_with(immediate(), ScriptedWorker::default(), records, view);
        let key = h.seed_case("case-1").await;

        let run_id = h.recalculate("case-1").await;
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 3);

        assert_eq!(h.worker.recalculations(), 1);
        assert_eq!(h.record(&key).await.status(), JobStatus::Completed);
        assert_eq!(
            h.orchestrator.get_run(run_id).await.unwrap().unwrap().status,
            RunStatus::Completed
        );
    }

    // ---- exports ---------------------------------------------------------

    async fn seed_export(h: &Harness, export: &ExportId, record: JobRecord) -> RecordKey {
        h.records.insert_job_record(record).await.unwrap();
        RecordKey::export(export)
    }

    #[tokio::test]
    async fn labelled_case_export_carries_resolution_only() {
        let h = harness(immediate(), ScriptedWorker::default());
        let export = ExportId::new("exp-1").unwrap();
        let key = seed_export(
            &h,
            &export,
            JobRecord::case_export(&export, case_id("case-1"), Utc::now()),
        )
        .await;

        h.orchestrator
            .send_raw(
                "export/case.data.requested",
                &json!({
                    "exportId": "exp-1",
                    "caseId": "case-1",
                    "format": "labelled_images",
                    "resolution": "1920x1080",
                }),
                None,
            )
            .await
            .unwrap();
        h.orchestrator.run_until_idle().await.unwrap();

        let exports = h.worker.exports();
        assert_eq!(exports.len(), 1);
        assert_eq!(
            exports[0],
            json!({
                "export_id": "exp-1",
                "case_id": "case-1",
                "format": "labelled_images",
                "resolution": "1920x1080",
                "password_protection": {"enabled": false},
            })
        );
        assert!(exports[0].get("page_size").is_none());

        // The worker finishes the export out of band.
        assert_eq!(h.record(&key).await.status(), JobStatus::Processing);
    }

    #[tokio::test]
    async fn pdf_case_export_carries_pdf_fields_and_password() {
        let h = harness(immediate(), ScriptedWorker::default());
        let export = ExportId::new("exp-2").unwrap();
        seed_export(
            &h,
            &export,
            JobRecord::case_export(&export, case_id("case-1"), Utc::now()),
        )
        .await;

        h.orchestrator
            .send_raw(
                "export/case.data.requested",
                &json!({
                    "exportId": "exp-2",
                    "caseId": "case-1",
                    "format": "pdf",
                    "pageSize": "letter",
                    "securityLevel": "high",
                    "permissions": {
                        "printing": true,
                        "copying": false,
                        "modifying": false,
                        "annotating": true,
                    },
                    "passwordProtection": {"enabled": true, "password": "s3cret"},
                }),
                None,
            )
            .await
            .unwrap();
        h.orchestrator.run_until_idle().await.unwrap();

        let body = &h.worker.exports()[0];
        assert_eq!(body["page_size"], "letter");
        assert_eq!(body["security_level"], "high");
        assert_eq!(body["permissions"]["annotating"], true);
        assert_eq!(body["password_protection"], json!({"enabled": true, "password": "s3cret"}));
        assert!(body.get("resolution").is_none());
    }

    #[tokio::test]
    async fn raw_image_export_omits_resolution() {
        let h = harness(immediate(), ScriptedWorker::default());
        let export = ExportId::new("exp-3").unwrap();
        let upload = UploadId::new("upload-9").unwrap();
        let key = seed_export(
            &h,
            &export,
            JobRecord::image_export(&export, upload.clone(), Utc::now()),
        )
        .await;

        h.orchestrator
            .send(ImageExportRequested {
                export_id: export,
                upload_id: upload,
                format: ImageExportFormat::RawData,
                password_protection: PasswordProtection::Disabled,
            })
            .await
            .unwrap();
        h.orchestrator.run_until_idle().await.unwrap();

        assert_eq!(
            h.worker.exports(),
            [json!({
                "export_id": "exp-3",
                "upload_id": "upload-9",
                "format": "raw_data",
                "password_protection": {"enabled": false},
            })]
        );
        assert_eq!(h.record(&key).await.status(), JobStatus::Processing);
    }

    // ---- compensator guard -----------------------------------------------

    #[tokio::test]
    async fn mismatched_event_is_logged_not_compensated() {
        let (logs, _guard) = capture_logs();
        let h = harness(immediate(), ScriptedWorker::default());
        let key = h.seed_case("case-1").await;

        let run = Run::new(
            functions::RecalculateCase::ID,
            EventEnvelope::new(SessionDelete {
                session_id: SessionId::new("s-1").unwrap(),
            }),
        );
        let run_id = h.runs.enqueue(run).await.unwrap();
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 1);

        assert_eq!(logs.count("compensator_event_mismatch"), 1);
        assert_eq!(logs.count(JOB_FAILED), 0);
        assert_eq!(h.worker.recalculations(), 0);
        assert_eq!(h.record(&key).await.status(), JobStatus::Pending);
        assert!(matches!(
            h.orchestrator.get_run(run_id).await.unwrap().unwrap().status,
            RunStatus::DeadLettered { attempts: 1, .. }
        ));
    }

    // ---- account deletion ------------------------------------------------

    async fn seed_account(h: &Harness, user: &UserId) -> RecordKey {
        let now = Utc::now();
        h.records
            .upsert_user(UserRecord::new(user.clone(), "entomologist@example.com", now))
            .await
            .unwrap();
        for sid in ["s-1", "s-2"] {
            h.records
                .upsert_session(SessionRecord::new(SessionId::new(sid).unwrap(), user.clone(), now))
                .await
                .unwrap();
        }
        h.records
            .insert_job_record(JobRecord::account_deletion(user.clone(), now))
            .await
            .unwrap();
        RecordKey::account_deletion(user)
    }

    #[tokio::test]
    async fn confirmed_deletion_removes_user_after_grace() {
        let h = harness(immediate(), ScriptedWorker::default());
        let user = UserId::new("user-1").unwrap();
        let key = seed_account(&h, &user).await;

        h.orchestrator
            .send(AccountDeletionConfirmed { user_id: user.clone() })
            .await
            .unwrap();
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 2);

        assert!(h.records.user(&user).await.unwrap().is_none());
        assert!(h.records.session(&SessionId::new("s-1").unwrap()).await.unwrap().is_none());
        assert_eq!(
            h.records.status_history(&key),
            [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed]
        );
    }

    #[tokio::test]
    async fn execution_waits_for_the_grace_period() {
        let settings = JobSettings {
            account_deletion_grace: Duration::from_secs(3600),
            ..immediate()
        };
        let h = harness(settings, ScriptedWorker::default());
        let user = UserId::new("user-1").unwrap();
        let key = seed_account(&h, &user).await;

        h.orchestrator
            .send(AccountDeletionConfirmed { user_id: user.clone() })
            .await
            .unwrap();
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 1);

        assert!(h.records.user(&user).await.unwrap().is_some());
        assert_eq!(h.record(&key).await.status(), JobStatus::Processing);
        assert_eq!(
            h.runs.stats().await.unwrap(),
            RunStats {
                pending: 1,
                completed: 1,
                ..RunStats::default()
            }
        );
    }

    #[tokio::test]
    async fn withdrawn_request_cancels_execution() {
        let h = harness(immediate(), ScriptedWorker::default());
        let user = UserId::new("user-1").unwrap();
        let key = seed_account(&h, &user).await;

        h.orchestrator
            .send(AccountDeletionConfirmed { user_id: user.clone() })
            .await
            .unwrap();
        h.orchestrator.process_next().await.unwrap();
        assert!(h.records.delete_job_record(&key).await.unwrap());

        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 1);
        assert!(h.records.user(&user).await.unwrap().is_some());
        assert!(h.orchestrator.dead_letters(10).await.unwrap().is_empty());
    }

    // ---- sessions --------------------------------------------------------

    fn session_id(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    #[tokio::test]
    async fn idle_session_is_scheduled_and_deleted() {
        let h = harness(immediate(), ScriptedWorker::default());

        h.orchestrator
            .send(SessionTrack {
                session_id: session_id("s-1"),
                user_id: UserId::new("user-1").unwrap(),
            })
            .await
            .unwrap();
        // track → check-inactivity → schedule-deletion → delete
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 4);

        assert!(h.records.session(&session_id("s-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn activity_cancels_scheduled_deletion() {
        let settings = JobSettings {
            session_inactivity_timeout: Duration::from_secs(1800),
            ..immediate()
        };
        let h = harness(settings, ScriptedWorker::default());
        let user = UserId::new("user-1").unwrap();

        let mut session = SessionRecord::new(session_id("s-1"), user.clone(), Utc::now());
        session.schedule_deletion(Utc::now() - chrono::Duration::minutes(1));
        h.records.upsert_session(session).await.unwrap();

        h.orchestrator
            .send(SessionTrack {
                session_id: session_id("s-1"),
                user_id: user,
            })
            .await
            .unwrap();
        // The inactivity check is 30 minutes out; only the track run is ready.
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 1);

        h.orchestrator
            .send(SessionDelete {
                session_id: session_id("s-1"),
            })
            .await
            .unwrap();
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 1);

        let session = h.records.session(&session_id("s-1")).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Active);
    }

    #[tokio::test]
    async fn cleanup_sweeps_only_idle_sessions() {
        let settings = JobSettings {
            session_inactivity_timeout: Duration::from_secs(1800),
            ..immediate()
        };
        let h = harness(settings, ScriptedWorker::default());
        let user = UserId::new("user-1").unwrap();
        let now = Utc::now();

        let mut stale = SessionRecord::new(session_id("stale"), user.clone(), now);
        stale.last_active_at = now - chrono::Duration::hours(2);
        h.records.upsert_session(stale).await.unwrap();
        h.records
            .upsert_session(SessionRecord::new(session_id("fresh"), user, now))
            .await
            .unwrap();

        h.orchestrator.send(SessionTriggerCleanup {}).await.unwrap();
        // trigger → schedule-deletion(stale) → delete(stale)
        assert_eq!(h.orchestrator.run_until_idle().await.unwrap(), 3);

        assert!(h.records.session(&session_id("stale")).await.unwrap().is_none());
        assert!(h.records.session(&session_id("fresh")).await.unwrap().is_some());
    }
}
