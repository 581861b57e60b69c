//! Application service: wires storage, the remote layer, and the catalog, and
//! turns every failure into an [`OperationResult`] with a readable message.

use std::fmt::Display;
use std::sync::Arc;

use anyhow::Context;
use semver::Version;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, Installable};
use crate::config::AppConfig;
use crate::profile::{
    CachingProfileManager, PlatformKind, Profile, ProfileAccess, ProfileRequest, SqliteProfileStore,
};
use crate::remote::{
    Connector, InstallReport, InstallationInfo, InstallationProbe, RemoteInstaller, SshConnector,
};
use crate::server::InstallRequest;

/// Outcome of an application operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationResult<T> {
    Success { data: T },
    Failure { message: String },
    BadArguments { message: String },
}

impl<T> OperationResult<T> {
    fn failed(context: &str, err: impl Display) -> Self {
        error!(error = %err, "{context} failed");
        OperationResult::Failure {
            message: err.to_string(),
        }
    }

    fn bad_arguments(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(message = %message, "Rejected arguments");
        OperationResult::BadArguments { message }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success { .. })
    }

    pub fn data(self) -> Option<T> {
        match self {
            OperationResult::Success { data } => Some(data),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            OperationResult::Success { .. } => None,
            OperationResult::Failure { message } | OperationResult::BadArguments { message } => {
                Some(message)
            }
        }
    }

    /// Convert into a `Result` for callers that propagate with `?`.
    pub fn into_result(self) -> anyhow::Result<T> {
        match self {
            OperationResult::Success { data } => Ok(data),
            OperationResult::Failure { message } => Err(anyhow::anyhow!(message)),
            OperationResult::BadArguments { message } => {
                Err(anyhow::anyhow!("invalid arguments: {message}"))
            }
        }
    }
}

pub type DefaultProfiles = CachingProfileManager<SqliteProfileStore>;

pub struct App<P: ProfileAccess = DefaultProfiles> {
    profiles: P,
    probe: InstallationProbe,
    installer: RemoteInstaller,
    catalog: Catalog,
}

impl App<DefaultProfiles> {
    /// Open the profile database and load configured catalogs.
    pub fn open(config: &AppConfig) -> anyhow::Result<Self> {
        let connector: Arc<dyn Connector> = Arc::new(SshConnector::new(config.ssh_options()));
        let probe = InstallationProbe::new(Arc::clone(&connector)).with_timeout(config.command_timeout);
        let installer = RemoteInstaller::new(connector).with_timeout(config.command_timeout);

        let store = SqliteProfileStore::open(&config.db_path, Box::new(probe.clone()))
            .with_context(|| format!("opening profile database {}", config.db_path.display()))?;
        let profiles = CachingProfileManager::with_config(store, config.cache);

        let mut catalog = Catalog::new();
        for source in &config.catalogs {
            catalog
                .load_file(&source.path, &source.platform_version)
                .with_context(|| format!("loading catalog {}", source.path.display()))?;
        }

        info!(db = %config.db_path.display(), installables = catalog.len(), "Application ready");
        Ok(App::new(profiles, probe, installer, catalog))
    }
}

impl<P: ProfileAccess> App<P> {
    pub fn new(profiles: P, probe: InstallationProbe, installer: RemoteInstaller, catalog: Catalog) -> Self {
        Self {
            profiles,
            probe,
            installer,
            catalog,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    pub fn create_profile(&self, request: ProfileRequest) -> OperationResult<Profile> {
        match self.profiles.create(request) {
            Ok(profile) => {
                info!(id = profile.id(), title = %profile.title, "Created profile");
                OperationResult::Success { data: profile }
            }
            Err(e) => OperationResult::failed("Create profile", e),
        }
    }

    pub fn load_profile_by_id(&self, id: i64) -> OperationResult<Profile> {
        match self.profiles.load_by_id(id) {
            Ok(Some(profile)) => OperationResult::Success { data: profile },
            Ok(None) => OperationResult::bad_arguments(format!("No profile with id {id}")),
            Err(e) => OperationResult::failed("Load profile", e),
        }
    }

    pub fn get_profiles(&self) -> OperationResult<Vec<Profile>> {
        match self.profiles.get_all() {
            Ok(profiles) => OperationResult::Success { data: profiles },
            Err(e) => OperationResult::failed("List profiles", e),
        }
    }

    /// Save in order; earlier saves stay committed if a later one fails.
    pub fn save_profiles(&self, mut profiles: Vec<Profile>) -> OperationResult<Vec<Profile>> {
        match self.profiles.save_all(&mut profiles) {
            Ok(()) => OperationResult::Success { data: profiles },
            Err(e) => OperationResult::failed("Save profiles", e),
        }
    }

    pub fn delete_profiles(&self, profiles: &[Profile]) -> OperationResult<()> {
        match self.profiles.delete_all(profiles) {
            Ok(()) => OperationResult::Success { data: () },
            Err(e) => OperationResult::failed("Delete profiles", e),
        }
    }

    // ========================================================================
    // Remote
    // ========================================================================

    pub fn probe_site(&self, user: &str, secret: &str, host: &str, root_dir: &str) -> OperationResult<InstallationInfo> {
        match self.probe.get_installation_info(user, secret, host, root_dir) {
            Ok(info) => OperationResult::Success { data: info },
            Err(e) => OperationResult::failed("Probe", e),
        }
    }

    /// Install one composer package directly.
    pub fn install_package(&self, profile: &Profile, secret: &str, namespace: &str) -> OperationResult<InstallReport> {
        if namespace.trim().is_empty() {
            return OperationResult::bad_arguments("Package name is empty");
        }
        match self.installer.install_package(profile, secret, namespace.trim()) {
            Ok(report) => OperationResult::Success { data: report },
            Err(e) => OperationResult::failed("Install", e),
        }
    }

    /// Run every composer instruction of `installable`, stopping at the first
    /// failure.
    pub fn install_installable(
        &self,
        installable: &Installable,
        profile: &Profile,
        secret: &str,
    ) -> OperationResult<Vec<InstallReport>> {
        if !installable.is_compatible_with(&profile.version) {
            return OperationResult::bad_arguments(format!(
                "{} is published for {}.x, site runs {}",
                installable.machine_name, installable.platform_version.major, profile.version
            ));
        }

        let namespaces: Vec<&str> = installable.composer_namespaces().collect();
        if namespaces.is_empty() {
            return OperationResult::bad_arguments(format!(
                "{} has no composer package",
                installable.machine_name
            ));
        }

        let mut reports = Vec::with_capacity(namespaces.len());
        for namespace in namespaces {
            match self.installer.install_package(profile, secret, namespace) {
                Ok(report) => reports.push(report),
                Err(e) => return OperationResult::failed("Install", e),
            }
        }
        info!(machine_name = %installable.machine_name, profile = profile.id(), "Installed");
        OperationResult::Success { data: reports }
    }

    pub fn update_packages(&self, profile: &Profile, secret: &str) -> OperationResult<InstallReport> {
        match self.installer.update_packages(profile, secret) {
            Ok(report) => OperationResult::Success { data: report },
            Err(e) => OperationResult::failed("Update", e),
        }
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    pub fn installables_for(&self, platform: PlatformKind, version: &Version) -> Vec<Installable> {
        match platform {
            PlatformKind::Drupal => self.catalog.for_version(version).into_iter().cloned().collect(),
        }
    }

    /// Catalog entries named by a loopback install request, across versions.
    pub fn installables_matching(&self, request: &InstallRequest) -> Vec<Installable> {
        match request.platform {
            PlatformKind::Drupal => self
                .catalog
                .find_by_machine_name(&request.machine_name)
                .into_iter()
                .cloned()
                .collect(),
        }
    }

    /// Resolve a loopback request against the catalog and install the entry
    /// matching the profile's platform version.
    pub fn fulfil_request(
        &self,
        request: &InstallRequest,
        profile: &Profile,
        secret: &str,
    ) -> OperationResult<Vec<InstallReport>> {
        let candidates = self.installables_matching(request);
        if candidates.is_empty() {
            return OperationResult::bad_arguments(format!(
                "{} is not in the catalog",
                request.machine_name
            ));
        }

        match candidates.iter().find(|i| i.is_compatible_with(&profile.version)) {
            Some(installable) => self.install_installable(installable, profile, secret),
            None => OperationResult::bad_arguments(format!(
                "{} has no release for {}",
                request.machine_name, profile.version
            )),
        }
    }
}
