//! Renders a whole pod into supervisor units.
//!
//! For every app, in manifest order: environment files, identity, sysusers
//! declaration, executable lookup, then the socket, service and reaper
//! units with their want links. The prepare-app template, shutdown unit and
//! default target are pod-wide. The first failure aborts the render and
//! already written files are left in place.

use std::path::{Path, PathBuf};

use stagehand_common::config::StagehandConfig;
use stagehand_common::error::{Result, ResultExt, StagehandError};
use stagehand_common::manifest::{Pod, Port, RuntimeApp};
use stagehand_core::capability::CapabilitySet;
use stagehand_core::cgroup::IsolatorMapper;
use stagehand_core::filesystem::resolve::locate_executable;
use stagehand_core::identity::{UidRange, resolve_user_group};

use crate::env::{self, Separator};
use crate::flavor::Flavor;
use crate::service::{self, ServiceSpec};
use crate::unit::write_unit;
use crate::{paths, sysusers};

/// Search path used when the app does not declare `PATH`: the app root,
/// then the usual binary directories.
const DEFAULT_SEARCH_PATH: &str = "/:/bin:/usr/bin";

/// Per-render switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Attach apps to the console's tty instead of the journal.
    pub interactive: bool,
    /// Flavor overriding the stage1 marker, if non-empty.
    pub flavor: Option<String>,
    /// User-namespace shift of the pod.
    pub uid_range: UidRange,
}

/// Writes the unit files for one pod.
#[derive(Debug)]
pub struct UnitEmitter<'a> {
    pod: &'a Pod,
    config: &'a StagehandConfig,
    mapper: IsolatorMapper,
    options: RenderOptions,
}

impl<'a> UnitEmitter<'a> {
    /// Creates an emitter probing controller support under the configured cgroup root.
    #[must_use]
    pub fn new(pod: &'a Pod, config: &'a StagehandConfig, options: RenderOptions) -> Self {
        Self {
            pod,
            config,
            mapper: IsolatorMapper::new(&config.cgroup_root),
            options,
        }
    }

    /// Renders every unit of the pod.
    ///
    /// # Errors
    ///
    /// Returns the first failure, naming the app it happened for.
    pub fn render_pod(&self) -> Result<()> {
        let root = &self.pod.root;
        let units = paths::units_dir(root);
        for dir in [
            units.clone(),
            units.join("default.target.wants"),
            units.join("sockets.target.wants"),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| StagehandError::io(&dir, e))?;
        }

        write_unit(
            &units.join("prepare-app@.service"),
            &service::prepare_app_template_options(),
        )
        .context("failed to write prepare-app service template")?;

        for ra in &self.pod.manifest.apps {
            self.render_app(ra).with_context(|| {
                format!("failed to transform app {:?} into systemd service", ra.name)
            })?;
        }

        let flavor = Flavor::detect(&paths::stage1_rootfs(root), self.options.flavor.as_deref())?;
        write_unit(
            &units.join("shutdown.service"),
            &service::shutdown_options(flavor.shutdown_verb()),
        )
        .context("failed to write shutdown service")?;

        write_unit(
            &units.join("default.target"),
            &service::default_target_options(
                self.pod.manifest.apps.iter().map(|ra| ra.name.as_str()),
            ),
        )
        .context("failed to write default target")?;

        tracing::info!(
            pod = %self.pod.uuid,
            apps = self.pod.manifest.apps.len(),
            flavor = %flavor.name,
            "pod units rendered"
        );
        Ok(())
    }

    fn render_app(&self, ra: &RuntimeApp) -> Result<()> {
        let root = &self.pod.root;
        let name = ra.name.as_str();
        let app = &ra.app;
        let image_name = self.pod.image_name(ra);
        let range = &self.options.uid_range;

        let Some(declared_exec) = app.exec.first() else {
            return Err(StagehandError::config(format!(
                "image {image_name:?} has an empty \"exec\" (try --exec=BINARY)"
            )));
        };
        let working_directory = app
            .working_directory
            .as_deref()
            .filter(|w| !w.is_empty())
            .unwrap_or("/");

        let mut environment = app.environment.clone();
        environment.set("AC_APP_NAME", name);
        if let Some(url) = &self.pod.metadata_service_url {
            environment.set("AC_METADATA_URL", url.as_str());
        }
        let defaults = &self.config.default_env;
        env::write_env_file(
            &paths::env_file_systemd(root, name),
            defaults,
            &environment,
            Separator::Newline,
            range,
        )
        .context("unable to write environment file for systemd")?;
        env::write_env_file(
            &paths::env_file_enterexec(root, name),
            defaults,
            &environment,
            Separator::Nul,
            range,
        )
        .context("unable to write environment file for enterexec")?;

        let app_root = paths::app_rootfs(root, name);
        let (uid, gid) = resolve_user_group(&app_root, &app.user, &app.group, range)?;
        sysusers::write_sysusers(root, name, uid, gid, &app.supplementary_gids, range)
            .context("unable to generate sysusers")?;

        let bin = resolve_bin(&app_root, declared_exec, app.environment.get("PATH"))?;
        let mut exec = Vec::with_capacity(app.exec.len());
        exec.push(bin);
        exec.extend(app.exec.iter().skip(1).cloned());

        let capabilities =
            CapabilitySet::bounding_set(&app.isolators, &self.config.default_capabilities);
        let tunables = self.mapper.map_isolators(&app.isolators)?;
        let socket_ports: Vec<&Port> = app.ports.iter().filter(|p| p.socket_activated).collect();

        let service_opts = service::service_options(&ServiceSpec {
            app_name: name,
            image_name: &image_name,
            exec,
            declared_exec,
            working_directory,
            uid,
            gid,
            supplementary_gids: &app.supplementary_gids,
            capabilities: &capabilities,
            event_handlers: &app.event_handlers,
            tunables: &tunables,
            socket_activated: !socket_ports.is_empty(),
            interactive: self.options.interactive,
        })?;

        if !socket_ports.is_empty() {
            let socket_opts = service::socket_options(self.pod, name, &image_name, &socket_ports)?;
            write_unit(&paths::socket_unit_path(root, name), &socket_opts)
                .context("failed to write socket unit file")?;
            link_want(
                &paths::socket_want_path(root, name),
                &paths::socket_unit_name(name),
            )
            .context("failed to link socket want")?;
        }

        write_unit(&paths::service_unit_path(root, name), &service_opts)
            .context("failed to write service unit file")?;
        link_want(
            &paths::service_want_path(root, name),
            &paths::service_unit_name(name),
        )
        .context("failed to link service want")?;

        write_unit(
            &paths::reaper_unit_path(root, name),
            &service::reaper_options(name),
        )
        .with_context(|| format!("failed to write app {name:?} reaper service"))?;

        tracing::debug!(app = name, uid, gid, "app units written");
        Ok(())
    }
}

/// Renders the pod's units, parsing the user-namespace shift from its
/// `shift:count` form (empty for none).
///
/// # Errors
///
/// Returns an error if the shift spec is malformed or rendering fails.
pub fn pod_to_units(
    pod: &Pod,
    config: &StagehandConfig,
    interactive: bool,
    flavor: &str,
    private_users: &str,
) -> Result<()> {
    let uid_range: UidRange = private_users.parse()?;
    let options = RenderOptions {
        interactive,
        flavor: Some(flavor.to_string()),
        uid_range,
    };
    UnitEmitter::new(pod, config, options).render_pod()
}

/// Resolves a relative executable on the app's search path; absolute
/// executables are used as declared.
fn resolve_bin(app_root: &Path, bin: &str, app_path: Option<&str>) -> Result<String> {
    if Path::new(bin).is_absolute() {
        return Ok(bin.to_string());
    }
    let search_path = app_path.unwrap_or(DEFAULT_SEARCH_PATH);
    let found: PathBuf = locate_executable(bin, search_path, app_root)
        .with_context(|| format!("error looking up {bin:?}"))?;
    Ok(found.to_string_lossy().into_owned())
}

/// Points `link` at `../<unit>`, replacing a link left by an earlier render.
fn link_want(link: &Path, unit: &str) -> Result<()> {
    if std::fs::symlink_metadata(link).is_ok() {
        std::fs::remove_file(link).map_err(|e| StagehandError::io(link, e))?;
    }
    std::os::unix::fs::symlink(Path::new("..").join(unit), link)
        .map_err(|e| StagehandError::io(link, e))
}
