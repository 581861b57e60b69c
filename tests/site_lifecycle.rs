//! End-to-end flows over the library API: register a site, reload it from
//! disk, install from the catalog, and clean up. The SSH transport is
//! replaced by an in-memory site; storage is a real SQLite file.

use std::sync::Arc;

use remote_site_installer::app::{App, OperationResult};
use remote_site_installer::catalog::Catalog;
use remote_site_installer::profile::{
    CacheConfig, CachingProfileManager, PlatformKind, ProfileAccess, ProfileRequest, SqliteProfileStore,
};
use remote_site_installer::remote::{Connector, InstallationProbe, RemoteInstaller};
use remote_site_installer::server::{InstallRequest, ProjectKind};
use semver::Version;
use tempfile::TempDir;

mod util;

use util::{FakeSite, TestTracing, fixture_path};

fn open_app(dir: &TempDir, site: &FakeSite) -> App {
    let connector: Arc<dyn Connector> = Arc::new(site.clone());
    let probe = InstallationProbe::new(Arc::clone(&connector));
    let installer = RemoteInstaller::new(connector);

    let store = SqliteProfileStore::open(&dir.path().join("profiles.db"), Box::new(probe.clone())).unwrap();
    let profiles = CachingProfileManager::with_config(store, CacheConfig::default());

    let mut catalog = Catalog::new();
    catalog
        .load_file(&fixture_path("drupal_modules_d11.json"), "11.0.0")
        .unwrap();

    App::new(profiles, probe, installer, catalog)
}

fn blog_request(password: &str) -> ProfileRequest {
    ProfileRequest {
        title: "Blog".into(),
        user_name: "deploy".into(),
        password: password.into(),
        host: "blog.example.org:2222".into(),
        directory: "/var/www/blog".into(),
    }
}

#[test]
fn register_then_reload_from_disk() {
    let dir = TempDir::new().unwrap();
    let site = FakeSite::drupal("/var/www/blog", "11.1.3");

    let id = {
        let app = open_app(&dir, &site);
        let profile = app.create_profile(blog_request("hunter2")).data().unwrap();
        assert_eq!(profile.password(), Some("hunter2"));
        assert_eq!(profile.version, Version::new(11, 1, 3));
        profile.id()
    };

    // A fresh process sees the row but never the password.
    let app = open_app(&dir, &site);
    let profile = app.load_profile_by_id(id).data().unwrap();
    assert_eq!(profile.title, "Blog");
    assert_eq!(profile.host, "blog.example.org:2222");
    assert_eq!(profile.version, Version::new(11, 1, 3));
    assert_eq!(profile.password(), None);
}

#[test]
fn wrong_password_saves_nothing() {
    let dir = TempDir::new().unwrap();
    let site = FakeSite::drupal("/var/www/blog", "11.1.3");
    let app = open_app(&dir, &site);

    let result = app.create_profile(blog_request("letmein"));
    match result {
        OperationResult::Failure { message } => assert!(message.contains("authentication failed")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(app.get_profiles().data().unwrap().is_empty());
    assert!(site.commands().is_empty());
}

#[test]
fn missing_version_file_names_both_candidates() {
    let dir = TempDir::new().unwrap();
    let mut site = FakeSite::drupal("/var/www/blog", "11.1.3");
    site.present.retain(|p| !p.ends_with("Drupal.php"));
    let app = open_app(&dir, &site);

    let message = app
        .create_profile(blog_request("hunter2"))
        .message()
        .unwrap()
        .to_string();
    assert!(message.contains("/var/www/blog/web/core/lib/Drupal.php"));
    assert!(message.contains("/var/www/blog/core/lib/Drupal.php"));
}

#[test]
fn install_from_catalog_request() {
    let dir = TempDir::new().unwrap();
    let site = FakeSite::drupal("/var/www/blog", "11.1.3");
    let app = open_app(&dir, &site);
    let profile = app.create_profile(blog_request("hunter2")).data().unwrap();

    let tracing = TestTracing::new();
    let _guard = tracing.install();

    let request = InstallRequest {
        platform: PlatformKind::Drupal,
        project: ProjectKind::Extension,
        machine_name: "pathauto".into(),
    };
    let reports = app.fulfil_request(&request, &profile, "hunter2").data().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].command,
        "cd '/var/www/blog' && composer require 'drupal/pathauto' && echo 'flubr'"
    );

    let commands = site.commands();
    let manifest_check = commands
        .iter()
        .rposition(|c| c.contains("'/var/www/blog/composer.json'"))
        .unwrap();
    let require = commands
        .iter()
        .position(|c| c.contains("composer require"))
        .unwrap();
    assert!(manifest_check < require);

    tracing.assert_contains("Candidate succeeded");
    tracing.assert_not_contains("hunter2");
}

#[test]
fn install_exhaustion_reports_every_candidate() {
    let dir = TempDir::new().unwrap();
    let mut site = FakeSite::drupal("/var/www/blog", "11.1.3");
    site.composer_works = false;
    let app = open_app(&dir, &site);
    let profile = app.create_profile(blog_request("hunter2")).data().unwrap();

    let message = app
        .install_package(&profile, "hunter2", "drupal/token")
        .message()
        .unwrap()
        .to_string();
    assert!(message.starts_with("No composer commands worked"));
    assert!(message.contains("composer require 'drupal/token' && echo 'flubr'"));
    assert!(message.contains("composer config minimum-stability dev"));

    let attempts = site
        .commands()
        .iter()
        .filter(|c| c.contains("composer require"))
        .count();
    assert_eq!(attempts, 2);
}

#[test]
fn cache_survives_until_delete() {
    let dir = TempDir::new().unwrap();
    let site = FakeSite::drupal("/var/www/blog", "10.3.2");
    let connector: Arc<dyn Connector> = Arc::new(site.clone());
    let probe = InstallationProbe::new(connector);
    let store = SqliteProfileStore::open(&dir.path().join("profiles.db"), Box::new(probe)).unwrap();
    let cache = CachingProfileManager::new(store);

    let created = cache.create(blog_request("hunter2")).unwrap();
    let cached = cache.load_by_id(created.id()).unwrap().unwrap();
    assert_eq!(cached, created);

    cache.delete(&created).unwrap();
    assert!(cache.load_by_id(created.id()).unwrap().is_none());
    assert!(cache.get_all().unwrap().is_empty());
    assert_eq!(cache.delegate().count().unwrap(), 0);
}

#[test]
fn listing_after_single_lookup_shows_every_site() {
    let dir = TempDir::new().unwrap();
    let site = FakeSite::drupal("/var/www/blog", "11.1.3");

    let (first, second) = {
        let app = open_app(&dir, &site);
        let first = app.create_profile(blog_request("hunter2")).data().unwrap();
        let mut shop = blog_request("hunter2");
        shop.title = "Shop".into();
        let second = app.create_profile(shop).data().unwrap();
        (first.id(), second.id())
    };

    let app = open_app(&dir, &site);
    assert_eq!(app.load_profile_by_id(second).data().unwrap().title, "Shop");

    let ids: Vec<i64> = app
        .get_profiles()
        .data()
        .unwrap()
        .iter()
        .map(|p| p.id())
        .collect();
    assert_eq!(ids, vec![first, second]);
}
