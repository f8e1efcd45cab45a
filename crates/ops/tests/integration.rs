//! Integration tests for ops crate

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::StreamExt;
    use orchard_config::{keys, ArtifactLayout, Config, MemoryPreferences, PrefValue, Preferences};
    use orchard_errors::Error;
    use orchard_events::{AppEvent, EventBus, InstallerEvent, Notification, Notifier};
    use orchard_install::status::{STATUS_FAILURE_ABORTED, STATUS_SUCCESS};
    use orchard_install::{
        callback_channel, AppInstaller, CallbackSink, ConfirmationIntent, ConfirmationLauncher,
        DeviceCapabilities, ForegroundProbe, InstallCallback, InstallGuard, InstallStatusReceiver,
        InstallerBackends, PackageInventory, PackageSessionApi, SessionId, SessionParams,
        SessionTracker, TokioCommandRunner,
    };
    use orchard_net::Fetcher;
    use orchard_ops::download::version_tag;
    use orchard_ops::migration::MigrationStep;
    use orchard_ops::update::{AUTOMATED_CHECK, EXPEDITED_CHECK};
    use orchard_ops::*;
    use orchard_types::{
        App, Download, DownloadFile, DownloadStatus, InstalledPackage, Update, VersionCode,
    };
    use orchard_work::{
        EnqueueOutcome, LocalWorkScheduler, SchedulerConfig, StaticConditions, WorkScheduler,
    };
    use proptest::prelude::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;
    use tokio_util::sync::CancellationToken;

    const WAIT: Duration = Duration::from_secs(10);

    /// Writes each file's name as its content, once a permit is available
    struct FakeFetcher {
        gate: Semaphore,
        fetched: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn open() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(64),
                fetched: Mutex::new(Vec::new()),
            })
        }

        fn gated() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                fetched: Mutex::new(Vec::new()),
            })
        }

        fn release(&self) {
            self.gate.add_permits(64);
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(
            &self,
            file: &DownloadFile,
            dest: &Path,
            cancel: &CancellationToken,
            progress: &(dyn Fn(u64) + Send + Sync),
        ) -> Result<u64, Error> {
            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                permit = self.gate.acquire() => drop(permit.unwrap()),
            }
            tokio::fs::write(dest, file.name.as_bytes()).await?;
            let written = file.name.len() as u64;
            progress(written);
            self.fetched.lock().unwrap().push(file.url.clone());
            Ok(written)
        }
    }

    /// Resolves every commit with a fixed status
    struct FakeSessionApi {
        next_id: AtomicI32,
        status: i32,
    }

    impl FakeSessionApi {
        fn resolving(status: i32) -> Arc<Self> {
            Arc::new(Self {
                next_id: AtomicI32::new(100),
                status,
            })
        }
    }

    #[async_trait]
    impl PackageSessionApi for FakeSessionApi {
        async fn create_session(&self, _params: &SessionParams) -> Result<SessionId, Error> {
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn write(&self, _session_id: SessionId, _name: &str, _path: &Path) -> Result<(), Error> {
            Ok(())
        }

        async fn commit(&self, session_id: SessionId, sink: CallbackSink) -> Result<(), Error> {
            sink.send(InstallCallback::for_session(session_id, self.status, None))
                .unwrap();
            Ok(())
        }

        async fn abandon(&self, _session_id: SessionId) {}

        async fn uninstall(&self, _package_name: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeInventory {
        installed: Mutex<Vec<InstalledPackage>>,
    }

    impl FakeInventory {
        fn with(packages: &[(&str, VersionCode)]) -> Arc<Self> {
            Arc::new(Self {
                installed: Mutex::new(
                    packages
                        .iter()
                        .map(|(name, version)| InstalledPackage::new(*name, *version))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl PackageInventory for FakeInventory {
        async fn installed_packages(&self) -> Result<Vec<InstalledPackage>, Error> {
            Ok(self.installed.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct FakeChecker {
        available: Mutex<Vec<Update>>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UpdateChecker for FakeChecker {
        async fn check(&self, installed: &[InstalledPackage]) -> Result<Vec<Update>, Error> {
            *self.seen.lock().unwrap() = installed.iter().map(|p| p.package_name.clone()).collect();
            Ok(self.available.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        posted: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        fn posted(&self) -> Vec<Notification> {
            self.posted.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: Notification) {
            self.posted.lock().unwrap().push(notification);
        }
    }

    struct Background;

    impl ForegroundProbe for Background {
        fn is_foreground(&self) -> bool {
            false
        }
    }

    struct NoLauncher;

    impl ConfirmationLauncher for NoLauncher {
        fn launch(&self, _intent: &ConfirmationIntent, _privileged: bool) -> Result<(), Error> {
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        orchard: Orchard,
        ctx: Arc<OpsCtx>,
        scheduler: LocalWorkScheduler,
        fetcher: Arc<FakeFetcher>,
        notifier: Arc<RecordingNotifier>,
        checker: Arc<FakeChecker>,
        preferences: Arc<MemoryPreferences>,
        guard: InstallGuard,
    }

    struct Setup {
        fetcher: Arc<FakeFetcher>,
        install_status: i32,
        auto_delete: bool,
        inventory: Arc<FakeInventory>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                fetcher: FakeFetcher::open(),
                install_status: STATUS_SUCCESS,
                auto_delete: true,
                inventory: Arc::new(FakeInventory::default()),
            }
        }
    }

    impl Harness {
        async fn new() -> Self {
            Self::with(Setup::default()).await
        }

        async fn with(setup: Setup) -> Self {
            let dir = TempDir::new().unwrap();
            let (queue, updates) = orchard_state::open(&dir.path().join("orchard.sqlite"))
                .await
                .unwrap();
            let layout = ArtifactLayout::new(dir.path().join("downloads"));
            let preferences = Arc::new(
                MemoryPreferences::new()
                    .with(keys::AUTO_DELETE, PrefValue::Bool(setup.auto_delete)),
            );
            let bus = EventBus::default();
            let notifier = Arc::new(RecordingNotifier::default());
            let checker = Arc::new(FakeChecker::default());

            let mut config = Config::default();
            config.work.max_attempts = 2;
            let scheduler = LocalWorkScheduler::new(
                Arc::new(StaticConditions::default()),
                SchedulerConfig {
                    constraint_poll: Duration::from_millis(20),
                    backoff: Duration::from_millis(20),
                    max_attempts: 2,
                    expedited_quota: 1,
                    expedited_window: Duration::from_secs(3600),
                },
            )
            .unwrap();

            let tracker = SessionTracker::new();
            let guard = InstallGuard::new();
            let (sink, stream) = callback_channel();
            let backends = InstallerBackends::new(
                FakeSessionApi::resolving(setup.install_status),
                Arc::new(TokioCommandRunner),
            );
            let installer = Arc::new(AppInstaller::new(
                backends,
                0,
                &DeviceCapabilities::default(),
                tracker.clone(),
                guard.clone(),
                sink,
            ));

            let ctx = Arc::new(
                OpsContextBuilder::new()
                    .with_config(config)
                    .with_state(queue.clone(), updates)
                    .with_event_bus(bus.clone())
                    .with_preferences(preferences.clone())
                    .with_scheduler(Arc::new(scheduler.clone()))
                    .with_installer(installer)
                    .with_fetcher(setup.fetcher.clone())
                    .with_inventory(setup.inventory)
                    .with_update_checker(checker.clone())
                    .with_notifier(notifier.clone())
                    .with_layout(layout.clone())
                    .build()
                    .unwrap(),
            );
            let receiver = Arc::new(InstallStatusReceiver::new(
                tracker,
                guard.clone(),
                bus,
                notifier.clone(),
                preferences.clone(),
                layout,
                queue,
                Arc::new(Background),
                Arc::new(NoLauncher),
            ));

            Self {
                dir,
                orchard: Orchard::new(Arc::clone(&ctx), receiver, stream),
                ctx,
                scheduler,
                fetcher: setup.fetcher,
                notifier,
                checker,
                preferences,
                guard,
            }
        }

        async fn status(&self, package: &str, version: VersionCode) -> Option<DownloadStatus> {
            self.ctx
                .queue
                .get(package, version)
                .await
                .unwrap()
                .map(|d| d.status)
        }

        async fn wait_for_status(&self, package: &str, version: VersionCode, status: DownloadStatus) {
            tokio::time::timeout(WAIT, async {
                while self.status(package, version).await != Some(status) {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap_or_else(|_| panic!("{package} never reached {status}"));
        }

        async fn wait_for_notification(&self, predicate: impl Fn(&Notification) -> bool) {
            tokio::time::timeout(WAIT, async {
                while !self.notifier.posted().iter().any(&predicate) {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("notification never posted");
        }
    }

    fn app(package: &str, version: VersionCode) -> App {
        App::new(package, version, package).with_file(DownloadFile::new(
            "base.apk",
            format!("https://cdn.example/{package}/{version}/base.apk"),
            8,
        ))
    }

    #[tokio::test]
    async fn test_enqueue_runs_to_completed() {
        let h = Harness::with(Setup {
            auto_delete: false,
            ..Setup::default()
        })
        .await;
        h.orchard.start().await;

        assert!(h.orchard.downloads().enqueue_app(&app("com.example.foo", 5)).await.unwrap());
        h.wait_for_status("com.example.foo", 5, DownloadStatus::Completed).await;
        h.wait_for_notification(|n| matches!(n, Notification::Installed { .. })).await;

        let download = h.ctx.queue.get("com.example.foo", 5).await.unwrap().unwrap();
        assert_eq!(download.progress, 100);
        assert!(h.ctx.layout.file_path("com.example.foo", 5, "base.apk").unwrap().exists());
        assert!(h.guard.is_empty());
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_install_success_deletes_artifacts() {
        let h = Harness::new().await;
        h.orchard.start().await;

        h.orchard.downloads().enqueue_app(&app("com.example.foo", 5)).await.unwrap();
        h.wait_for_notification(|n| matches!(n, Notification::Installed { .. })).await;

        assert!(h.status("com.example.foo", 5).await.is_none());
        assert!(!h.ctx.layout.version_dir("com.example.foo", 5).exists());
        assert!(!h.guard.contains("com.example.foo"));
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_single_active_transfer() {
        let h = Harness::with(Setup {
            fetcher: FakeFetcher::gated(),
            ..Setup::default()
        })
        .await;

        let max_active = Arc::new(AtomicUsize::new(0));
        let watcher = {
            let max_active = Arc::clone(&max_active);
            let mut snapshots = h.ctx.queue.downloads();
            tokio::spawn(async move {
                while let Some(snapshot) = snapshots.next().await {
                    let active = snapshot.iter().filter(|d| d.status.is_active()).count();
                    max_active.fetch_max(active, Ordering::SeqCst);
                }
            })
        };
        h.orchard.start().await;

        let downloads = h.orchard.downloads();
        downloads.enqueue_app(&app("com.example.foo", 5)).await.unwrap();
        downloads.enqueue_app(&app("com.example.bar", 2)).await.unwrap();

        h.wait_for_status("com.example.foo", 5, DownloadStatus::Downloading).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.status("com.example.bar", 2).await, Some(DownloadStatus::Queued));

        h.fetcher.release();
        h.wait_for_notification(|n| {
            matches!(n, Notification::Installed { package_name, .. } if package_name == "com.example.bar")
        })
        .await;

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        let fetched = h.fetcher.fetched();
        assert!(fetched[0].contains("com.example.foo"));
        assert!(fetched[1].contains("com.example.bar"));
        watcher.abort();
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_reenqueue_does_not_duplicate() {
        let h = Harness::with(Setup {
            fetcher: FakeFetcher::gated(),
            ..Setup::default()
        })
        .await;
        h.orchard.start().await;

        let downloads = h.orchard.downloads();
        assert!(downloads.enqueue_app(&app("com.example.foo", 5)).await.unwrap());
        h.wait_for_status("com.example.foo", 5, DownloadStatus::Downloading).await;
        assert!(!downloads.enqueue_app(&app("com.example.foo", 5)).await.unwrap());

        assert_eq!(h.ctx.queue.count().await.unwrap(), 1);
        let infos = h.scheduler.work_infos_by_tag(&version_tag("com.example.foo", 5));
        assert_eq!(infos.len(), 1);
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_queued_download_never_runs() {
        let h = Harness::with(Setup {
            fetcher: FakeFetcher::gated(),
            ..Setup::default()
        })
        .await;
        h.orchard.start().await;

        let downloads = h.orchard.downloads();
        downloads.enqueue_app(&app("com.example.foo", 5)).await.unwrap();
        downloads.enqueue_app(&app("com.example.bar", 2)).await.unwrap();
        h.wait_for_status("com.example.foo", 5, DownloadStatus::Downloading).await;

        downloads.cancel_download("com.example.bar").await.unwrap();
        assert_eq!(h.status("com.example.bar", 2).await, Some(DownloadStatus::Cancelled));

        h.fetcher.release();
        h.wait_for_notification(|n| matches!(n, Notification::Installed { .. })).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.status("com.example.bar", 2).await, Some(DownloadStatus::Cancelled));
        assert!(!downloads.has_pending_work("com.example.bar"));
        assert!(h.scheduler.work_infos_by_tag(&version_tag("com.example.bar", 2)).is_empty());
        assert!(h.fetcher.fetched().iter().all(|url| !url.contains("com.example.bar")));
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_active_download() {
        let h = Harness::with(Setup {
            fetcher: FakeFetcher::gated(),
            ..Setup::default()
        })
        .await;
        h.orchard.start().await;

        let downloads = h.orchard.downloads();
        downloads.enqueue_app(&app("com.example.foo", 5)).await.unwrap();
        h.wait_for_status("com.example.foo", 5, DownloadStatus::Downloading).await;

        downloads.cancel_download("com.example.foo").await.unwrap();
        assert_eq!(h.status("com.example.foo", 5).await, Some(DownloadStatus::Cancelled));
        assert!(!downloads.has_pending_work("com.example.foo"));
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_download() {
        let h = Harness::new().await;
        let err = h
            .orchard
            .downloads()
            .cancel_download("com.example.missing")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Ops(orchard_errors::OpsError::DownloadNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_restart_fails_interrupted_download() {
        let h = Harness::with(Setup {
            fetcher: FakeFetcher::gated(),
            ..Setup::default()
        })
        .await;
        let interrupted = Download::from_app(&app("com.example.foo", 5));
        h.ctx.queue.insert(&interrupted).await.unwrap();
        h.ctx
            .queue
            .update_version_status("com.example.foo", 5, DownloadStatus::Downloading)
            .await
            .unwrap();

        h.orchard.start().await;

        assert_eq!(h.status("com.example.foo", 5).await, Some(DownloadStatus::Failed));
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconcile_keeps_queued_without_work() {
        let h = Harness::new().await;
        let queued = Download::from_app(&app("com.example.foo", 5));
        h.ctx.queue.insert(&queued).await.unwrap();

        assert_eq!(h.orchard.downloads().reconcile().await.unwrap(), 0);
        assert_eq!(h.status("com.example.foo", 5).await, Some(DownloadStatus::Queued));
    }

    #[tokio::test]
    async fn test_cancel_all_updates_only() {
        let h = Harness::new().await;
        let downloads = h.orchard.downloads();
        downloads.enqueue_app(&app("com.example.foo", 5)).await.unwrap();
        let update = Update::new("com.example.bar", 3, "Bar")
            .with_file(DownloadFile::new("base.apk", "https://cdn.example/bar.apk", 4));
        downloads.enqueue_update(&update).await.unwrap();

        assert_eq!(downloads.cancel_all(true).await.unwrap(), 1);
        assert_eq!(h.status("com.example.bar", 3).await, Some(DownloadStatus::Cancelled));
        assert_eq!(h.status("com.example.foo", 5).await, Some(DownloadStatus::Queued));

        assert_eq!(downloads.cancel_all(false).await.unwrap(), 1);
        assert_eq!(h.status("com.example.foo", 5).await, Some(DownloadStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_new_version_supersedes_queued() {
        let h = Harness::new().await;
        let downloads = h.orchard.downloads();
        downloads.enqueue_app(&app("com.example.foo", 5)).await.unwrap();
        downloads.enqueue_app(&app("com.example.foo", 6)).await.unwrap();

        assert_eq!(h.status("com.example.foo", 5).await, Some(DownloadStatus::Cancelled));
        assert_eq!(h.status("com.example.foo", 6).await, Some(DownloadStatus::Queued));
    }

    #[tokio::test]
    async fn test_clear_download_removes_record_and_artifacts() {
        let h = Harness::new().await;
        let downloads = h.orchard.downloads();
        downloads.enqueue_app(&app("com.example.foo", 5)).await.unwrap();
        let dir = h.ctx.layout.ensure_version_dir("com.example.foo", 5).await.unwrap();
        tokio::fs::write(dir.join("base.apk"), b"base").await.unwrap();

        assert!(downloads.clear_download("com.example.foo", 5).await.unwrap());
        assert!(h.status("com.example.foo", 5).await.is_none());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_clear_finished_keeps_queued() {
        let h = Harness::new().await;
        let downloads = h.orchard.downloads();
        downloads.enqueue_app(&app("com.example.foo", 5)).await.unwrap();
        downloads.enqueue_app(&app("com.example.bar", 2)).await.unwrap();
        downloads.cancel_download("com.example.bar").await.unwrap();
        let dir = h.ctx.layout.ensure_version_dir("com.example.bar", 2).await.unwrap();

        assert_eq!(downloads.clear_finished_downloads().await.unwrap(), 1);
        assert!(!dir.exists());
        assert_eq!(h.status("com.example.foo", 5).await, Some(DownloadStatus::Queued));

        assert_eq!(downloads.clear_all_downloads().await.unwrap(), 1);
        assert_eq!(h.ctx.queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_fails_download() {
        let h = Harness::new().await;
        h.orchard.start().await;

        let tampered = App::new("com.example.foo", 5, "Foo").with_file(
            DownloadFile::new("base.apk", "https://cdn.example/base.apk", 8)
                .with_sha256("0".repeat(64)),
        );
        h.orchard.downloads().enqueue_app(&tampered).await.unwrap();

        h.wait_for_status("com.example.foo", 5, DownloadStatus::Failed).await;
        h.wait_for_notification(|n| matches!(n, Notification::DownloadFailed { .. })).await;
        assert!(h.guard.is_empty());
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_file_name_outside_download_root_fails() {
        let h = Harness::new().await;
        h.orchard.start().await;

        let app = App::new("com.example.foo", 5, "Foo").with_file(DownloadFile::new(
            "../../../escaped.apk",
            "https://cdn.example/escaped.apk",
            8,
        ));
        h.orchard.downloads().enqueue_app(&app).await.unwrap();

        h.wait_for_status("com.example.foo", 5, DownloadStatus::Failed).await;
        h.wait_for_notification(|n| matches!(n, Notification::DownloadFailed { .. })).await;
        assert!(h.fetcher.fetched().is_empty());
        assert!(!h.dir.path().join("escaped.apk").exists());
        assert!(h.guard.is_empty());
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_aborted_install_is_cancelled_not_failed() {
        let h = Harness::with(Setup {
            install_status: STATUS_FAILURE_ABORTED,
            ..Setup::default()
        })
        .await;
        let mut events = h.ctx.bus.subscribe();
        h.orchard.start().await;

        h.orchard.downloads().enqueue_app(&app("com.example.foo", 5)).await.unwrap();

        let cancelled = tokio::time::timeout(WAIT, async {
            loop {
                if let AppEvent::Installer(event @ InstallerEvent::Cancelled { .. }) =
                    events.recv().await.unwrap()
                {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(cancelled.package_name(), "com.example.foo");

        h.wait_for_notification(|n| matches!(n, Notification::InstallCancelled { .. })).await;
        assert!(!h
            .notifier
            .posted()
            .iter()
            .any(|n| matches!(n, Notification::InstallFailed { .. })));
        assert!(!h.guard.contains("com.example.foo"));
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_extended_updates_toggle_visibility() {
        let h = Harness::new().await;
        h.ctx
            .updates
            .replace_all(&[
                Update::new("com.example.signed", 2, "Signed").with_valid_cert(true),
                Update::new("com.example.resigned", 3, "Resigned").with_valid_cert(false),
            ])
            .await
            .unwrap();

        let helper = h.orchard.updates();
        let mut visible = helper.updates();
        let first = tokio::time::timeout(WAIT, visible.next()).await.unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(helper.visible_updates().await.unwrap().len(), 1);

        h.preferences
            .set(keys::EXTENDED_UPDATES, PrefValue::Bool(true))
            .unwrap();
        let second = tokio::time::timeout(WAIT, visible.next()).await.unwrap().unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(helper.visible_updates().await.unwrap().len(), 2);

        assert_eq!(h.ctx.updates.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_check_filters_and_prunes() {
        let h = Harness::with(Setup {
            inventory: FakeInventory::with(&[
                ("com.example.foo", 1),
                ("com.example.bar", 4),
                ("com.example.baz", 1),
            ]),
            ..Setup::default()
        })
        .await;
        *h.checker.available.lock().unwrap() = vec![
            Update::new("com.example.foo", 2, "Foo").with_valid_cert(true),
            Update::new("com.example.bar", 3, "Bar").with_valid_cert(true),
            Update::new("com.example.gone", 9, "Gone").with_valid_cert(true),
        ];
        let helper = h.orchard.updates();
        helper.blacklist("com.example.baz").unwrap();

        let found = helper.run_check().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].package_name, "com.example.foo");
        assert!(!h.checker.seen.lock().unwrap().contains(&"com.example.baz".to_string()));

        // Installed behind the store's back
        h.ctx
            .updates
            .upsert(&Update::new("com.example.bar", 5, "Bar"))
            .await
            .unwrap();
        h.ctx
            .updates
            .upsert(&Update::new("com.example.baz", 2, "Baz"))
            .await
            .unwrap();
        assert_eq!(helper.prune().await.unwrap(), 1);
        let remaining: Vec<String> = h
            .ctx
            .updates
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.package_name)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&"com.example.baz".to_string()));
    }

    #[tokio::test]
    async fn test_install_and_blacklist_events_remove_updates() {
        let h = Harness::new().await;
        h.ctx
            .updates
            .replace_all(&[
                Update::new("com.example.foo", 2, "Foo"),
                Update::new("com.example.bar", 3, "Bar"),
            ])
            .await
            .unwrap();
        h.orchard.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let handler = h.orchard.broadcast_handler("org.orchard.app");
        assert!(handler
            .handle(PackageBroadcast::Added {
                package_name: "com.example.foo".into(),
            })
            .await
            .is_none());
        h.orchard.updates().blacklist("com.example.bar").unwrap();

        tokio::time::timeout(WAIT, async {
            while !h.ctx.updates.all().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        h.orchard.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcasts_clear_guard() {
        let h = Harness::new().await;
        let mut events = h.ctx.bus.subscribe();
        let handler = h.orchard.broadcast_handler("org.orchard.app");

        assert!(h.guard.try_claim("com.example.foo"));
        handler
            .handle(PackageBroadcast::Removed {
                package_name: "com.example.foo".into(),
            })
            .await;
        assert!(!h.guard.contains("com.example.foo"));
        assert!(matches!(
            events.recv().await.unwrap(),
            AppEvent::Installer(InstallerEvent::Uninstalled { .. })
        ));

        let report = handler
            .handle(PackageBroadcast::Replaced {
                package_name: "org.orchard.app".into(),
            })
            .await
            .unwrap();
        assert_eq!(report.version, 2);
    }

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let h = Harness::new().await;
        let runner = MigrationRunner::new(Arc::clone(&h.ctx));
        assert_eq!(runner.target_version(), 2);

        let first = runner.run().await;
        assert_eq!(first.from, 0);
        assert_eq!(first.version, 2);
        assert_eq!(first.applied, vec![1, 2]);
        assert_eq!(h.preferences.migration_version(), 2);
        assert_eq!(h.scheduler.work_infos_for_unique(AUTOMATED_CHECK).len(), 1);

        let second = runner.run().await;
        assert_eq!(second.from, 2);
        assert_eq!(second.version, 2);
        assert!(second.applied.is_empty());
        assert_eq!(h.scheduler.work_infos_for_unique(AUTOMATED_CHECK).len(), 1);
    }

    #[tokio::test]
    async fn test_migration_resets_invalid_interval() {
        let h = Harness::new().await;
        h.preferences
            .set(keys::UPDATE_CHECK_INTERVAL, PrefValue::Int(-4))
            .unwrap();
        h.preferences
            .set(keys::MIGRATION_VERSION, PrefValue::Int(1))
            .unwrap();

        let report = MigrationRunner::new(Arc::clone(&h.ctx)).run().await;
        assert_eq!(report.applied, vec![2]);
        assert!(h.preferences.get(keys::UPDATE_CHECK_INTERVAL).is_none());
        assert_eq!(
            h.orchard.updates().check_interval(),
            Duration::from_secs(3 * 60 * 60)
        );
    }

    struct FailingStep;

    #[async_trait]
    impl MigrationStep for FailingStep {
        fn version(&self) -> u32 {
            1
        }

        fn name(&self) -> &str {
            "failing"
        }

        async fn apply(&self, _ctx: &Arc<OpsCtx>) -> Result<(), Error> {
            Err(Error::internal("boom"))
        }
    }

    struct CountingStep(Arc<AtomicUsize>);

    #[async_trait]
    impl MigrationStep for CountingStep {
        fn version(&self) -> u32 {
            2
        }

        fn name(&self) -> &str {
            "counting"
        }

        async fn apply(&self, _ctx: &Arc<OpsCtx>) -> Result<(), Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_step_does_not_block_later_steps() {
        let h = Harness::new().await;
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = MigrationRunner::with_steps(
            Arc::clone(&h.ctx),
            vec![Box::new(CountingStep(Arc::clone(&runs))), Box::new(FailingStep)],
        );

        let report = runner.run().await;
        assert_eq!(report.failed, vec![1]);
        assert_eq!(report.applied, vec![2]);
        assert_eq!(report.version, 2);

        runner.run().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expedited_check_dropped_over_quota() {
        let h = Harness::new().await;
        let helper = h.orchard.updates();

        let first = helper.check_updates_now().unwrap();
        assert!(matches!(first, EnqueueOutcome::Enqueued(_)));
        tokio::time::timeout(WAIT, async {
            while !h
                .scheduler
                .work_infos_for_unique(EXPEDITED_CHECK)
                .iter()
                .all(|info| info.state.is_finished())
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(helper.check_updates_now().unwrap(), EnqueueOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_low_memory_restarts_observers() {
        let h = Harness::new().await;
        h.orchard.start().await;
        let before = h.orchard.scope().token();

        h.orchard.on_low_memory();
        assert!(before.is_cancelled());

        h.orchard.downloads().enqueue_app(&app("com.example.foo", 5)).await.unwrap();
        h.wait_for_notification(|n| matches!(n, Notification::Installed { .. })).await;
        h.orchard.shutdown().await;
    }

    fn status_strategy() -> impl Strategy<Value = DownloadStatus> {
        prop::sample::select(DownloadStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_trigger_respects_single_transfer(
            entries in prop::collection::vec((status_strategy(), 0i64..1_000), 0..12)
        ) {
            let downloads: Vec<Download> = entries
                .iter()
                .enumerate()
                .map(|(i, (status, age))| {
                    let mut download = Download::from_app(&app(&format!("com.example.p{i}"), 1));
                    download.status = *status;
                    download.added_at = chrono::Utc::now() - chrono::Duration::seconds(*age);
                    download
                })
                .collect();

            match next_to_trigger(&downloads) {
                Some(next) => {
                    prop_assert_eq!(next.status, DownloadStatus::Queued);
                    prop_assert!(downloads.iter().all(|d| !d.status.is_active()));
                    prop_assert!(downloads
                        .iter()
                        .filter(|d| d.status == DownloadStatus::Queued)
                        .all(|d| d.added_at >= next.added_at));
                }
                None => prop_assert!(
                    downloads.iter().any(|d| d.status.is_active())
                        || downloads.iter().all(|d| d.status != DownloadStatus::Queued)
                ),
            }
        }
    }
}
