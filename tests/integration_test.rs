//! Integration tests for reposync
//!
//! These drive whole sync passes against a temporary workspace, a scripted
//! git runner and (for SmartSync/HyperSync) an in-process manifest server.

use gitcmd::fake::FakeGit;
use reposync::config::ManifestServerConfig;
use reposync::report::MemoryReporter;
use reposync::retry::RetryOptions;
use reposync::sync::{FetchTimes, ManifestSource, ProjectState, SyncEngine, SyncOptions};
use reposync::workspace::Workspace;
use reposync::ReposyncError;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const MANIFEST: &str = r#"<manifest>
  <remote name="origin" fetch="https://git.example.com"/>
  <default remote="origin" revision="main"/>
  <project name="platform/build" path="build/make" groups="pdk">
    <copyfile src="core/root.mk" dest="Makefile"/>
    <linkfile src="tools" dest="tools"/>
  </project>
  <project name="platform/art" path="art" groups="A"/>
  <project name="platform/bionic" path="bionic" groups="B"/>
</manifest>"#;

const CONFLICT: &str =
    "error: Your local changes to the following files would be overwritten by checkout";

struct Fixture {
    _temp: TempDir,
    workspace: Workspace,
    git: Arc<FakeGit>,
}

impl Fixture {
    fn new(manifest: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::new(temp.path());
        fs::create_dir_all(workspace.manifests_dir()).unwrap();

        // Files the build project's copyfile/linkfile entries point at
        let build = workspace.worktree("build/make");
        fs::create_dir_all(build.join("core")).unwrap();
        fs::create_dir_all(build.join("tools")).unwrap();
        fs::write(build.join("core/root.mk"), "include build/make/core/main.mk\n").unwrap();

        let fixture = Self {
            _temp: temp,
            workspace,
            git: Arc::new(FakeGit::new()),
        };
        fixture.write_manifest(manifest);
        fixture
    }

    fn write_manifest(&self, xml: &str) {
        fs::write(self.workspace.manifest_path(Some("default.xml")), xml).unwrap();
    }

    fn engine(&self) -> SyncEngine {
        SyncEngine::new(
            self.workspace.clone(),
            self.workspace.manifest_path(Some("default.xml")),
            self.git.clone(),
        )
    }
}

fn options() -> SyncOptions {
    let mut options = SyncOptions::default();
    options.retry = RetryOptions::quick();
    options.jobs_network = 2;
    options.jobs_checkout = 2;
    options
}

mod sync_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_sync_clones_and_checks_out_everything() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();

        let summary = engine.sync(options()).await.unwrap();
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.checked_out, 3);
        assert!(engine.errors().is_empty());

        assert_eq!(fx.git.calls_matching("clone --no-checkout").len(), 3);
        assert_eq!(fx.git.calls_matching("checkout --detach refs/remotes/origin/main").len(), 3);
        assert_eq!(fx.git.calls_matching("gc --auto").len(), 3);

        let list = fs::read_to_string(fx.workspace.project_list_path()).unwrap();
        assert_eq!(list, "art\nbionic\nbuild/make\n");
        assert_eq!(summary.states.len(), 3);
        assert!(summary.states.values().all(|s| *s == ProjectState::Synced));

        // Second pass fetches instead of cloning
        engine.sync(options()).await.unwrap();
        assert_eq!(fx.git.calls_matching("clone").len(), 3);
        assert_eq!(fx.git.calls_matching("fetch --prune origin").len(), 3);
    }

    #[tokio::test]
    async fn test_group_filter_limits_projects() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        let mut opts = options();
        opts.groups = vec!["A".to_string()];

        let summary = engine.sync(opts).await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.checked_out, 1);

        let clones = fx.git.calls_matching("clone");
        assert_eq!(clones.len(), 1);
        assert!(clones[0].command_line().contains("platform/art"));
        assert_eq!(engine.manifest().unwrap().projects.len(), 1);
    }

    #[tokio::test]
    async fn test_named_projects() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        let mut opts = options();
        opts.projects = vec!["art".to_string(), "platform/bionic".to_string()];

        let summary = engine.sync(opts).await.unwrap();
        assert_eq!(summary.fetched, 2);
        assert!(fx.git.calls_matching("clone platform/build").is_empty());

        let mut opts = options();
        opts.projects = vec!["platform/nope".to_string()];
        assert!(matches!(
            engine.sync(opts).await,
            Err(ReposyncError::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_checkout_of_that_project() {
        let fx = Fixture::new(MANIFEST);
        fx.git.fail("clone bionic", 128, "ERROR: Repository not found.");
        let reporter = Arc::new(MemoryReporter::new());
        let mut engine = fx.engine().with_reporter(reporter.clone());

        let result = engine.sync(options()).await;
        assert!(matches!(result, Err(ReposyncError::SyncFailed { failed: 1 })));

        let errors = engine.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("platform/bionic"));
        assert!(reporter
            .lines()
            .iter()
            .any(|line| line.starts_with("error: ") && line.contains("platform/bionic")));

        // Other projects still check out
        assert!(fx.git.calls_matching("bionic checkout --detach").is_empty());
        assert_eq!(fx.git.calls_matching("art checkout --detach").len(), 1);

        let states = engine.project_states();
        assert_eq!(states.get("bionic"), Some(&ProjectState::Failed));
        assert_eq!(states.get("art"), Some(&ProjectState::Synced));
    }

    #[tokio::test]
    async fn test_missing_projects_retried_after_manifest_reload() {
        let fx = Fixture::new(MANIFEST);
        fx.git.fail_times("clone bionic", 1, 128, "ERROR: Repository not found.");
        let mut engine = fx.engine();

        let summary = engine.sync(options()).await.unwrap();
        assert_eq!(summary.fetched, 3);
        assert_eq!(fx.git.calls_matching("clone bionic").len(), 2);
        assert!(engine.errors().is_empty());
    }

    #[tokio::test]
    async fn test_persistent_failure_ends_missing_project_rounds() {
        let fx = Fixture::new(MANIFEST);
        fx.git.fail("clone bionic", 128, "ERROR: Repository not found.");
        let mut engine = fx.engine();

        let result = engine.sync(options()).await;
        assert!(matches!(result, Err(ReposyncError::SyncFailed { failed: 1 })));

        // First round plus one retry against the reloaded manifest; the
        // unchanged missing set ends the loop
        assert_eq!(fx.git.calls_matching("clone bionic").len(), 2);
        assert_eq!(engine.errors().len(), 1);
        assert_eq!(
            engine.project_states().get("bionic"),
            Some(&ProjectState::Failed)
        );
    }

    #[tokio::test]
    async fn test_superproject_pins_reach_checkout() {
        const ART_ID: &str = "89abcdef0123456789abcdef0123456789abcdef";
        let fx = Fixture::new(&MANIFEST.replace(
            r#"<default remote="origin" revision="main"/>"#,
            r#"<default remote="origin" revision="main"
                superproject-url="https://git.example.com/superproject"
                superproject-branch="main"/>"#,
        ));
        fx.git.respond("ls-tree", format!("160000 commit {}\tart\n", ART_ID));
        let mut engine = fx.engine();
        let mut opts = options();
        opts.use_superproject = true;

        let summary = engine.sync(opts).await.unwrap();
        assert_eq!(summary.checked_out, 3);
        assert_eq!(
            fx.git
                .calls_matching("fetch https://git.example.com/superproject main")
                .len(),
            1
        );

        let pinned = format!("art checkout --detach {}", ART_ID);
        assert_eq!(fx.git.calls_matching(&pinned).len(), 1);
        // Projects absent from the superproject tree follow the manifest
        assert_eq!(
            fx.git
                .calls_matching("bionic checkout --detach refs/remotes/origin/main")
                .len(),
            1
        );
        assert!(fx.workspace.superproject_manifest_path().is_file());
    }

    #[tokio::test]
    async fn test_superproject_without_branch_aborts() {
        let fx = Fixture::new(&MANIFEST.replace(
            r#"<default remote="origin" revision="main"/>"#,
            r#"<default remote="origin" revision="main"
                superproject-url="https://git.example.com/superproject"/>"#,
        ));
        let mut engine = fx.engine();
        let mut opts = options();
        opts.use_superproject = true;

        assert!(matches!(
            engine.sync(opts).await,
            Err(ReposyncError::Superproject(_))
        ));
        assert!(fx.git.calls_matching("clone").is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast_stops_before_checkout() {
        let fx = Fixture::new(MANIFEST);
        fx.git.fail("clone bionic", 128, "ERROR: Repository not found.");
        let mut engine = fx.engine();
        let mut opts = options();
        opts.fail_fast = true;
        opts.jobs_network = 1;

        let result = engine.sync(opts).await;
        assert!(matches!(result, Err(ReposyncError::SyncFailed { failed: 1 })));
        assert!(fx.git.calls_matching("checkout --detach").is_empty());
        // No second round after a fail-fast stop
        assert_eq!(fx.git.calls_matching("clone bionic").len(), 1);
    }

    #[tokio::test]
    async fn test_network_only_and_local_only() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();

        let mut opts = options();
        opts.network_only = true;
        let summary = engine.sync(opts).await.unwrap();
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.checked_out, 0);
        assert!(fx.git.calls_matching("checkout --detach").is_empty());

        let mut opts = options();
        opts.local_only = true;
        let summary = engine.sync(opts).await.unwrap();
        assert_eq!(summary.fetched, 0);
        assert_eq!(summary.checked_out, 3);
        assert_eq!(fx.git.calls_matching("clone").len(), 3);
        assert!(fx.git.calls_matching("fetch").is_empty());
    }

    #[tokio::test]
    async fn test_dirty_checkout_conflict_and_force_sync() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        engine.sync(options()).await.unwrap();

        // Populated and modified
        fs::write(fx.workspace.worktree("art").join(".git/index"), "").unwrap();
        fx.git.respond("art status --porcelain", " M runtime/runtime.cc\n");

        let result = engine.sync(options()).await;
        assert!(matches!(result, Err(ReposyncError::SyncFailed { failed: 1 })));
        assert!(engine.errors()[0].contains("Checkout conflict"));

        fx.git.fail_times("art checkout --detach", 1, 1, CONFLICT);
        let mut opts = options();
        opts.force_sync = true;
        engine.sync(opts).await.unwrap();
        assert_eq!(fx.git.calls_matching("art reset --hard").len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        engine.cancel_token().cancel();

        assert!(matches!(
            engine.sync(options()).await,
            Err(ReposyncError::Cancelled(_))
        ));
        assert!(fx.git.calls_matching("clone").is_empty());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_fatal() {
        let fx = Fixture::new(MANIFEST);
        fs::remove_file(fx.workspace.manifest_path(Some("default.xml"))).unwrap();
        let mut engine = fx.engine();

        let err = engine.sync(options()).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(fx.git.calls().is_empty());
    }
}

mod workspace_state_tests {
    use super::*;

    #[tokio::test]
    async fn test_prune_removed_projects() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        engine.sync(options()).await.unwrap();

        // Real repositories so the prune pass can inspect them
        git2::Repository::init(fx.workspace.worktree("bionic")).unwrap();
        git2::Repository::init(fx.workspace.worktree("art")).unwrap();
        fs::write(fx.workspace.worktree("art").join("scratch.txt"), "wip").unwrap();

        fx.write_manifest(
            r#"<manifest>
              <remote name="origin" fetch="https://git.example.com"/>
              <default remote="origin" revision="main"/>
              <project name="platform/build" path="build/make"/>
            </manifest>"#,
        );
        let summary = engine.sync(options()).await.unwrap();

        assert_eq!(summary.pruned, 1);
        assert!(!fx.workspace.worktree("bionic").exists());
        // Dirty checkouts survive and stay listed
        assert!(fx.workspace.worktree("art").exists());
        let list = fs::read_to_string(fx.workspace.project_list_path()).unwrap();
        assert_eq!(list, "art\nbuild/make\n");

        let mut opts = options();
        opts.force_remove_dirty = true;
        engine.sync(opts).await.unwrap();
        assert!(!fx.workspace.worktree("art").exists());
        let list = fs::read_to_string(fx.workspace.project_list_path()).unwrap();
        assert_eq!(list, "build/make\n");
    }

    #[tokio::test]
    async fn test_no_prune_keeps_checkouts() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        engine.sync(options()).await.unwrap();
        git2::Repository::init(fx.workspace.worktree("bionic")).unwrap();

        fx.write_manifest(&MANIFEST.replace(
            r#"<project name="platform/bionic" path="bionic" groups="B"/>"#,
            "",
        ));
        let mut opts = options();
        opts.prune = false;
        let summary = engine.sync(opts).await.unwrap();
        assert_eq!(summary.pruned, 0);
        assert!(fx.workspace.worktree("bionic").exists());

        // Still listed, so a later prune can remove it
        let list = fs::read_to_string(fx.workspace.project_list_path()).unwrap();
        assert_eq!(list, "art\nbionic\nbuild/make\n");
    }

    #[tokio::test]
    async fn test_project_list_written_without_prune() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        let mut opts = options();
        opts.prune = false;
        engine.sync(opts).await.unwrap();

        let list = fs::read_to_string(fx.workspace.project_list_path()).unwrap();
        assert_eq!(list, "art\nbionic\nbuild/make\n");

        // A project dropped after a no-prune pass is pruned by the next pass
        git2::Repository::init(fx.workspace.worktree("bionic")).unwrap();
        fx.write_manifest(&MANIFEST.replace(
            r#"<project name="platform/bionic" path="bionic" groups="B"/>"#,
            "",
        ));
        let summary = engine.sync(options()).await.unwrap();
        assert_eq!(summary.pruned, 1);
        assert!(!fx.workspace.worktree("bionic").exists());
        let list = fs::read_to_string(fx.workspace.project_list_path()).unwrap();
        assert_eq!(list, "art\nbuild/make\n");
    }

    #[tokio::test]
    async fn test_named_sync_leaves_project_list_alone() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        let mut opts = options();
        opts.projects = vec!["art".to_string()];
        engine.sync(opts).await.unwrap();

        assert!(!fx.workspace.project_list_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copy_link_files_applied_and_cleaned_up() {
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        engine.sync(options()).await.unwrap();

        let root = fx.workspace.root();
        assert_eq!(
            fs::read_to_string(root.join("Makefile")).unwrap(),
            "include build/make/core/main.mk\n"
        );
        assert!(fs::symlink_metadata(root.join("tools"))
            .unwrap()
            .file_type()
            .is_symlink());

        fx.write_manifest(&MANIFEST.replace(
            r#"<copyfile src="core/root.mk" dest="Makefile"/>"#,
            "",
        ));
        let summary = engine.sync(options()).await.unwrap();
        assert_eq!(summary.stale_files_removed, 1);
        assert!(!root.join("Makefile").exists());
        assert!(fs::symlink_metadata(root.join("tools")).is_ok());
    }

    #[tokio::test]
    async fn test_hooks_installed_into_each_project() {
        let fx = Fixture::new(MANIFEST);
        fs::create_dir_all(fx.workspace.hooks_dir()).unwrap();
        fs::write(fx.workspace.hooks_dir().join("commit-msg"), "#!/bin/sh\nexit 0\n").unwrap();

        let mut engine = fx.engine();
        engine.sync(options()).await.unwrap();

        for path in ["art", "bionic", "build/make"] {
            assert!(fx
                .workspace
                .worktree(path)
                .join(".git/hooks/commit-msg")
                .is_file());
        }
    }

    #[tokio::test]
    async fn test_manifest_repository_refresh_records_fetch_time() {
        let fx = Fixture::new(MANIFEST);
        fs::create_dir_all(fx.workspace.manifests_dir().join(".git")).unwrap();
        let mut engine = fx.engine();

        engine.sync(options()).await.unwrap();
        assert_eq!(fx.git.calls_matching(".repo/manifests fetch").len(), 1);

        let times = FetchTimes::load(&fx.workspace.fetch_times_path()).unwrap();
        assert!(times.get("repo").is_some());
    }
}

mod manifest_server_tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    const ART_ID: &str = "0123456789abcdef0123456789abcdef01234567";

    /// `bot:secret`
    const BASIC_AUTH: &str = "Basic Ym90OnNlY3JldA==";

    fn approved_manifest() -> String {
        format!(
            r#"<manifest>
              <remote name="origin" fetch="https://git.example.com"/>
              <default remote="origin" revision="main"/>
              <project name="platform/art" path="art" revision="{}"/>
            </manifest>"#,
            ART_ID
        )
    }

    async fn get_approved_manifest(
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some(BASIC_AUTH);
        if !authorized {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        if params.get("branch").map(String::as_str) != Some("main") {
            return StatusCode::BAD_REQUEST.into_response();
        }
        approved_manifest().into_response()
    }

    async fn get_manifest(Query(params): Query<HashMap<String, String>>) -> Response {
        match params.get("tag").map(String::as_str) {
            Some("release-1") => approved_manifest().into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn get_changed_projects() -> Json<Vec<String>> {
        Json(vec!["platform/art".to_string()])
    }

    async fn start_server() -> String {
        let app = Router::new()
            .route("/api/GetApprovedManifest", get(get_approved_manifest))
            .route("/api/GetManifest", get(get_manifest))
            .route("/api/GetChangedProjects", get(get_changed_projects));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn server(url: String, password: &str) -> ManifestServerConfig {
        ManifestServerConfig {
            url,
            username: Some("bot".to_string()),
            password: Some(password.to_string()),
        }
    }

    #[tokio::test]
    async fn test_smart_sync_replaces_manifest() {
        let url = start_server().await;
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        let mut opts = options();
        opts.smart_sync = true;
        opts.manifest_server = Some(server(url, "secret"));

        let summary = engine.sync(opts).await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert!(matches!(engine.source(), ManifestSource::Bytes(_)));
        assert_eq!(engine.manifest().unwrap().projects.len(), 1);
        assert!(fx.workspace.smart_sync_manifest_path().is_file());

        let detach = format!("art checkout --detach {}", ART_ID);
        assert_eq!(fx.git.calls_matching(&detach).len(), 1);
        assert!(fx.git.calls_matching("clone bionic").is_empty());
    }

    #[tokio::test]
    async fn test_smart_sync_by_tag() {
        let url = start_server().await;
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        let mut opts = options();
        opts.smart_tag = Some("release-1".to_string());
        opts.manifest_server = Some(server(url.clone(), "secret"));

        let summary = engine.sync(opts).await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert!(matches!(engine.source(), ManifestSource::Bytes(_)));
        let detach = format!("art checkout --detach {}", ART_ID);
        assert_eq!(fx.git.calls_matching(&detach).len(), 1);

        // An unknown tag stops the pass before any project is touched
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        let mut opts = options();
        opts.smart_tag = Some("no-such-tag".to_string());
        opts.manifest_server = Some(server(url, "secret"));
        assert!(matches!(
            engine.sync(opts).await,
            Err(ReposyncError::ManifestServer(_))
        ));
        assert!(fx.git.calls_matching("clone").is_empty());
    }

    #[tokio::test]
    async fn test_smart_sync_bad_credentials_abort() {
        let url = start_server().await;
        let fx = Fixture::new(MANIFEST);
        let mut engine = fx.engine();
        let mut opts = options();
        opts.smart_sync = true;
        opts.manifest_server = Some(server(url, "wrong"));

        match engine.sync(opts).await {
            Err(ReposyncError::ManifestServer(msg)) => {
                assert!(msg.contains("authentication failed"))
            }
            other => panic!("expected manifest server error, got {:?}", other),
        }
        assert!(fx.git.calls_matching("clone").is_empty());
    }

    #[tokio::test]
    async fn test_hyper_sync_fetches_changed_projects_only() {
        let url = start_server().await;
        let fx = Fixture::new(MANIFEST);
        fs::create_dir_all(fx.workspace.manifests_dir().join(".git")).unwrap();
        let mut engine = fx.engine();

        // A normal pass records the manifest repository fetch time
        engine.sync(options()).await.unwrap();
        assert_eq!(fx.git.calls_matching(".repo/manifests fetch").len(), 1);

        let mut opts = options();
        opts.hyper_sync = true;
        opts.manifest_server = Some(server(url, "secret"));
        let summary = engine.sync(opts).await.unwrap();

        assert_eq!(summary.fetched, 1);
        assert_eq!(fx.git.calls_matching("art fetch --prune").len(), 1);
        assert_eq!(fx.git.calls_matching("bionic fetch --prune").len(), 0);
        // Fresh manifest repository is not fetched again
        assert_eq!(fx.git.calls_matching(".repo/manifests fetch").len(), 1);
    }
}
