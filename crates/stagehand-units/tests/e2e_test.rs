//! End-to-end tests for pod rendering.
//!
//! Each test assembles a throwaway pod directory the way the pod-assembly
//! step leaves it (manifest, stage1 markers, app root filesystems) and runs
//! the public entry points against it:
//! 1. Unit rendering (service, socket, reaper, pod-wide units)
//! 2. Isolator mapping against a fake host cgroup root
//! 3. Executable and identity resolution inside app roots
//! 4. Cgroup tree construction with a recording mounter
//! 5. Sandbox launcher arguments

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use stagehand_common::config::StagehandConfig;
use stagehand_common::error::StagehandError;
use stagehand_common::manifest::Pod;
use stagehand_common::types::PodId;
use stagehand_units::emitter::pod_to_units;
use stagehand_units::paths;
use stagehand_units::{RenderOptions, UnitEmitter};

const UUID: &str = "0f3c2a1e-5b6d-4e7f-8a9b-0c1d2e3f4a5b";

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    cgroup_root: PathBuf,
}

impl Fixture {
    /// A pod whose stage1 is flavor `src` with the given version marker.
    fn new(manifest: &str, systemd_version: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("pod");
        let stage1 = paths::stage1_rootfs(&root);
        std::fs::create_dir_all(&stage1).unwrap();
        std::os::unix::fs::symlink("src", stage1.join("flavor")).unwrap();
        std::fs::write(stage1.join("systemd-version"), systemd_version).unwrap();
        std::fs::write(root.join("pod"), manifest).unwrap();

        let cgroup_root = dir.path().join("host-cgroup");
        std::fs::create_dir_all(&cgroup_root).unwrap();
        Self {
            _dir: dir,
            root,
            cgroup_root,
        }
    }

    fn enable_controller(&self, controller: &str, knob: &str) {
        let dir = self.cgroup_root.join(controller);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(knob), "").unwrap();
    }

    fn app_root(&self, app: &str) -> PathBuf {
        let root = paths::app_rootfs(&self.root, app);
        std::fs::create_dir_all(root.join("etc")).unwrap();
        root
    }

    fn executable(&self, app: &str, rel: &str) {
        let path = self.app_root(app).join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn pod(&self) -> Pod {
        Pod::load(&self.root, UUID.parse::<PodId>().unwrap()).expect("load pod")
    }

    fn config(&self) -> StagehandConfig {
        StagehandConfig {
            cgroup_root: self.cgroup_root.clone(),
            ..StagehandConfig::default()
        }
    }

    fn render(&self, options: RenderOptions) -> Result<(), StagehandError> {
        let pod = self.pod();
        let config = self.config();
        UnitEmitter::new(&pod, &config, options).render_pod()
    }

    fn unit(&self, name: &str) -> String {
        std::fs::read_to_string(paths::units_dir(&self.root).join(name))
            .unwrap_or_else(|e| panic!("reading unit {name}: {e}"))
    }
}

fn app_manifest(app: &str) -> String {
    format!(
        r#"{{
        "apps": [{{
            "name": "web",
            "image": {{"name": "example.com/web", "id": "sha512-abc"}},
            "app": {app}
        }}],
        "ports": [{{"name": "http", "hostPort": 8080}}]
    }}"#
    )
}

// ── Unit rendering ───────────────────────────────────────────────────

#[test]
fn renders_every_pod_file() {
    let fx = Fixture::new(
        &app_manifest(
            r#"{
            "exec": ["/bin/web", "--greeting", "it's $HOME"],
            "user": "root", "group": "root",
            "supplementaryGIDs": [10],
            "environment": [{"name": "HOME", "value": "/srv"}],
            "eventHandlers": [{"name": "pre-start", "exec": ["/bin/prep"]}]
        }"#,
        ),
        "v231\n",
    );
    let _ = fx.app_root("web");
    fx.render(RenderOptions::default()).expect("render");

    let service = fx.unit("web.service");
    assert!(service.contains("ExecStart=\"/bin/web\" \"--greeting\" \"it\\'s $$HOME\"\n"));
    assert!(service.contains("ExecStartPre=\"/bin/prep\"\n"));
    assert!(service.contains("SupplementaryGroups=10\n"));
    assert!(service.contains("CapabilityBoundingSet=CAP_AUDIT_WRITE CAP_CHOWN"));
    assert!(service.contains("Requires=prepare-app@opt-stage2-web-rootfs.service\n"));
    assert!(service.contains("SyslogIdentifier=web\n"));

    assert!(fx.unit("reaper-web.service").contains("ExecStop=/reaper.sh web\n"));
    assert!(fx.unit("prepare-app@.service").contains("ExecStart=/prepare-app %I\n"));
    assert!(fx.unit("shutdown.service").contains("ExecStop=/usr/bin/systemctl --force exit\n"));
    assert!(fx.unit("default.target").contains("Wants=web.service\n"));

    let want = paths::service_want_path(&fx.root, "web");
    assert_eq!(std::fs::read_link(want).unwrap(), PathBuf::from("../web.service"));

    let env = std::fs::read_to_string(paths::env_file_systemd(&fx.root, "web")).unwrap();
    assert!(env.starts_with("PATH="));
    assert!(env.contains("HOME=/srv\n"));
    assert!(!env.contains("HOME=/root"));
    assert!(env.ends_with("AC_APP_NAME=web\n"));
    let enterexec = std::fs::read(paths::env_file_enterexec(&fx.root, "web")).unwrap();
    assert!(enterexec.ends_with(b"AC_APP_NAME=web\0"));

    let sysusers = std::fs::read_to_string(paths::sysusers_file(&fx.root, "web")).unwrap();
    assert_eq!(sysusers, "g gen10 10\ng gen0 0\nu gen0 0 \"gen0\"\n");
}

#[test]
fn old_supervisor_halts_instead_of_exit() {
    let fx = Fixture::new(
        &app_manifest(r#"{"exec": ["/bin/web"], "user": "0", "group": "0"}"#),
        "v222\n",
    );
    let _ = fx.app_root("web");
    fx.render(RenderOptions::default()).unwrap();
    assert!(fx.unit("shutdown.service").contains("--force halt\n"));
}

#[test]
fn rendering_twice_is_accepted() {
    let fx = Fixture::new(
        &app_manifest(r#"{"exec": ["/bin/web"], "user": "0", "group": "0"}"#),
        "v231\n",
    );
    let _ = fx.app_root("web");
    fx.render(RenderOptions::default()).unwrap();
    fx.render(RenderOptions::default()).unwrap();
}

#[test]
fn interactive_apps_use_the_tty() {
    let fx = Fixture::new(
        &app_manifest(r#"{"exec": ["/bin/sh"], "user": "0", "group": "0"}"#),
        "v231\n",
    );
    let _ = fx.app_root("web");
    let pod = fx.pod();
    pod_to_units(&pod, &fx.config(), true, "", "").unwrap();
    let service = fx.unit("web.service");
    assert!(service.contains("StandardInput=tty\n"));
    assert!(!service.contains("journal+console"));
}

#[test]
fn empty_exec_aborts_the_pod() {
    let fx = Fixture::new(
        &app_manifest(r#"{"exec": [], "user": "0", "group": "0"}"#),
        "v231\n",
    );
    let err = fx.render(RenderOptions::default()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("failed to transform app \"web\" into systemd service"));
    assert!(msg.contains("empty \"exec\""));
}

#[test]
fn malformed_private_users_spec_is_rejected() {
    let fx = Fixture::new(
        &app_manifest(r#"{"exec": ["/bin/web"], "user": "0", "group": "0"}"#),
        "v231\n",
    );
    let pod = fx.pod();
    assert!(pod_to_units(&pod, &fx.config(), false, "", "not-a-range").is_err());
}

// ── Socket activation ────────────────────────────────────────────────

fn socket_app(protocol: &str, name: &str) -> String {
    app_manifest(&format!(
        r#"{{
        "exec": ["/bin/web"], "user": "0", "group": "0",
        "ports": [{{"name": "{name}", "protocol": "{protocol}", "port": 80, "socketActivated": true}}]
    }}"#
    ))
}

#[test]
fn tcp_port_gets_stream_listener_on_host_port() {
    let fx = Fixture::new(&socket_app("tcp", "http"), "v231\n");
    let _ = fx.app_root("web");
    fx.render(RenderOptions::default()).unwrap();
    let socket = fx.unit("web.socket");
    assert!(socket.contains("[Socket]\nBindIPv6Only=both\nService=web.service\nListenStream=8080\n"));
    assert!(fx.unit("web.service").contains("Requires=web.socket\n"));
    let want = paths::socket_want_path(&fx.root, "web");
    assert_eq!(std::fs::read_link(want).unwrap(), PathBuf::from("../web.socket"));
}

#[test]
fn udp_port_without_forward_falls_back_to_image_port() {
    let fx = Fixture::new(&socket_app("udp", "dns"), "v231\n");
    let _ = fx.app_root("web");
    fx.render(RenderOptions::default()).unwrap();
    assert!(fx.unit("web.socket").contains("ListenDatagram=80\n"));
}

#[test]
fn unknown_protocol_fails_unit_generation() {
    let fx = Fixture::new(&socket_app("sctp", "http"), "v231\n");
    let _ = fx.app_root("web");
    let err = fx.render(RenderOptions::default()).unwrap_err();
    assert!(matches!(err.root_cause(), StagehandError::Config { .. }));
    assert!(err.to_string().contains("unrecognized protocol: sctp"));
}

// ── Isolators ────────────────────────────────────────────────────────

#[test]
fn memory_only_kernel_emits_single_memory_limit() {
    let fx = Fixture::new(
        &app_manifest(
            r#"{
            "exec": ["/bin/web"], "user": "0", "group": "0",
            "isolators": [{"name": "resource/memory", "value": {"limit": 104857600}}]
        }"#,
        ),
        "v231\n",
    );
    fx.enable_controller("memory", "memory.limit_in_bytes");
    let _ = fx.app_root("web");
    fx.render(RenderOptions::default()).unwrap();

    let service = fx.unit("web.service");
    let limits: Vec<_> = service
        .lines()
        .filter(|l| l.starts_with("MemoryLimit=") || l.starts_with("CPU"))
        .collect();
    assert_eq!(limits, vec!["MemoryLimit=104857600"]);
}

#[test]
fn unsupported_cpu_controller_is_skipped() {
    let fx = Fixture::new(
        &app_manifest(
            r#"{
            "exec": ["/bin/web"], "user": "0", "group": "0",
            "isolators": [
                {"name": "resource/cpu", "value": {"limit": "500m"}},
                {"name": "resource/memory", "value": {"limit": "1Gi"}}
            ]
        }"#,
        ),
        "v231\n",
    );
    fx.enable_controller("memory", "memory.limit_in_bytes");
    let _ = fx.app_root("web");
    fx.render(RenderOptions::default()).unwrap();
    let service = fx.unit("web.service");
    assert!(!service.contains("CPUQuota"));
    assert!(service.contains("MemoryLimit=1073741824\n"));
}

#[test]
fn cpu_limit_becomes_quota() {
    let fx = Fixture::new(
        &app_manifest(
            r#"{
            "exec": ["/bin/web"], "user": "0", "group": "0",
            "isolators": [{"name": "resource/cpu", "value": {"limit": "1500m"}}]
        }"#,
        ),
        "v231\n",
    );
    fx.enable_controller("cpu", "cpu.cfs_quota_us");
    let _ = fx.app_root("web");
    fx.render(RenderOptions::default()).unwrap();
    assert!(fx.unit("web.service").contains("CPUQuota=150%\n"));
}

#[test]
fn unrepresentable_cpu_limit_aborts_the_pod() {
    let fx = Fixture::new(
        &app_manifest(
            r#"{
            "exec": ["/bin/web"], "user": "0", "group": "0",
            "isolators": [{"name": "resource/cpu", "value": {"limit": "10E"}}]
        }"#,
        ),
        "v231\n",
    );
    fx.enable_controller("cpu", "cpu.cfs_quota_us");
    let _ = fx.app_root("web");
    let err = fx.render(RenderOptions::default()).unwrap_err();
    assert!(err.to_string().contains("failed to transform app \"web\""));
    assert!(matches!(err.root_cause(), StagehandError::CpuLimitExceeded { .. }));
    assert!(!paths::service_unit_path(&fx.root, "web").exists());
}

#[test]
fn retained_capabilities_lead_the_bounding_set() {
    let fx = Fixture::new(
        &app_manifest(
            r#"{
            "exec": ["/bin/web"], "user": "0", "group": "0",
            "isolators": [{"name": "os/linux/capabilities-retain-set", "value": {"set": ["CAP_NET_ADMIN", "CAP_KILL"]}}]
        }"#,
        ),
        "v231\n",
    );
    let _ = fx.app_root("web");
    fx.render(RenderOptions::default()).unwrap();
    let service = fx.unit("web.service");
    let line = service
        .lines()
        .find(|l| l.starts_with("CapabilityBoundingSet="))
        .unwrap();
    assert!(line.starts_with("CapabilityBoundingSet=CAP_NET_ADMIN CAP_KILL CAP_AUDIT_WRITE"));
    assert_eq!(line.matches("CAP_KILL").count(), 1);
}

// ── Executable and identity resolution ───────────────────────────────

#[test]
fn relative_exec_follows_symlink_inside_app() {
    let fx = Fixture::new(
        &app_manifest(
            r#"{
            "exec": ["myapp", "--flag"], "user": "0", "group": "0",
            "environment": [{"name": "PATH", "value": "appRoot:/bin"}]
        }"#,
        ),
        "v231\n",
    );
    fx.executable("web", "usr/bin/myapp-2");
    let bin = fx.app_root("web").join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::os::unix::fs::symlink("/usr/bin/myapp-2", bin.join("myapp")).unwrap();

    fx.render(RenderOptions::default()).unwrap();
    let service = fx.unit("web.service");
    assert!(service.contains("ExecStart=\"/usr/bin/myapp-2\" \"--flag\"\n"));
    assert!(service.contains("SyslogIdentifier=myapp\n"));
}

#[test]
fn missing_relative_exec_is_fatal() {
    let fx = Fixture::new(
        &app_manifest(r#"{"exec": ["nothere"], "user": "0", "group": "0"}"#),
        "v231\n",
    );
    let _ = fx.app_root("web");
    let err = fx.render(RenderOptions::default()).unwrap_err();
    assert!(matches!(err.root_cause(), StagehandError::NotFound { kind: "executable", .. }));
}

#[test]
fn names_resolve_against_app_databases() {
    let fx = Fixture::new(
        &app_manifest(r#"{"exec": ["/bin/web"], "user": "www", "group": "web"}"#),
        "v231\n",
    );
    let etc = fx.app_root("web").join("etc");
    std::fs::write(etc.join("passwd"), "www:x:33:33::/var/www:/bin/false\n").unwrap();
    std::fs::write(etc.join("group"), "web:x:82:\n").unwrap();
    fx.render(RenderOptions::default()).unwrap();
    let service = fx.unit("web.service");
    assert!(service.contains("User=33\nGroup=82\n"));
}

#[test]
fn unknown_user_aborts_the_pod() {
    let fx = Fixture::new(
        &app_manifest(r#"{"exec": ["/bin/web"], "user": "ghost", "group": "0"}"#),
        "v231\n",
    );
    let _ = fx.app_root("web");
    let err = fx.render(RenderOptions::default()).unwrap_err();
    assert!(err.to_string().contains("cannot lookup user \"ghost\""));
}

/// Chowning to arbitrary ids needs root; the shifted-pod tests are skipped otherwise.
fn running_as_root(fx: &Fixture) -> bool {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(&fx.root).unwrap().uid() == 0
}

#[test]
fn path_specs_are_unshifted_for_private_users() {
    use std::os::unix::fs::MetadataExt;

    let fx = Fixture::new(
        &app_manifest(r#"{"exec": ["/bin/web"], "user": "/owned", "group": "/owned"}"#),
        "v231\n",
    );
    if !running_as_root(&fx) {
        return;
    }
    let owned = fx.app_root("web").join("owned");
    std::fs::write(&owned, "").unwrap();
    std::os::unix::fs::chown(&owned, Some(101_000), Some(101_001)).unwrap();

    let pod = fx.pod();
    pod_to_units(&pod, &fx.config(), false, "", "100000:65536").unwrap();
    assert!(fx.unit("web.service").contains("User=1000\nGroup=1001\n"));

    let env = std::fs::metadata(paths::env_file_systemd(&fx.root, "web")).unwrap();
    assert_eq!((env.uid(), env.gid()), (100_000, 100_000));
}

#[test]
fn path_spec_owner_outside_private_users_range_is_fatal() {
    let fx = Fixture::new(
        &app_manifest(r#"{"exec": ["/bin/web"], "user": "/owned", "group": "0"}"#),
        "v231\n",
    );
    if !running_as_root(&fx) {
        return;
    }
    std::fs::write(fx.app_root("web").join("owned"), "").unwrap();

    let pod = fx.pod();
    let err = pod_to_units(&pod, &fx.config(), false, "", "100000:65536").unwrap_err();
    assert!(matches!(err.root_cause(), StagehandError::IdOutOfRange { id: 0, .. }));
}

#[test]
fn path_spec_cannot_leave_the_app_root() {
    let fx = Fixture::new(
        &app_manifest(r#"{"exec": ["/bin/web"], "user": "/../../../../pod", "group": "0"}"#),
        "v231\n",
    );
    let _ = fx.app_root("web");
    let err = fx.render(RenderOptions::default()).unwrap_err();
    assert!(matches!(err.root_cause(), StagehandError::PathEscape { .. }));
}

// ── Cgroup tree ──────────────────────────────────────────────────────

#[test]
fn cgroup_tree_for_pod_services() {
    use stagehand_core::cgroup::{CgroupPhase, ControllerCatalog, CgroupMounter};
    use stagehand_core::filesystem::mount::RecordingMounter;

    let proc_cgroups = "#subsys_name\thierarchy\tnum_cgroups\tenabled\n\
                        cpu\t2\t1\t1\ncpuacct\t2\t1\t1\nmemory\t3\t1\t1\nnet_prio\t4\t1\t0\n";
    let catalog = ControllerCatalog::parse(proc_cgroups.as_bytes()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mounter = RecordingMounter::new();
    let mut builder = CgroupMounter::new(&mounter, &catalog);
    builder
        .build(dir.path(), Path::new("/system.slice"), &["web.service".to_string()])
        .unwrap();
    assert_eq!(builder.phase(), Some(CgroupPhase::RemountTmpfsReadOnly));

    let tmpfs = dir.path().join("sys/fs/cgroup");
    assert_eq!(
        std::fs::read_link(tmpfs.join("cpuacct")).unwrap(),
        PathBuf::from("cpu,cpuacct")
    );
    assert!(tmpfs.join("cpu,cpuacct/system.slice/web.service").is_dir());
    assert!(!tmpfs.join("net_prio").exists());
}

// ── Sandbox launcher ─────────────────────────────────────────────────

#[test]
fn nspawn_args_for_rendered_pod() {
    let fx = Fixture::new(
        r#"{
        "apps": [{
            "name": "db",
            "app": {
                "exec": ["/bin/db"], "user": "0", "group": "0",
                "mountPoints": [{"name": "data", "path": "/var/lib/db", "readOnly": true}]
            }
        }],
        "volumes": [{"name": "data", "kind": "host", "source": "/srv/db", "readOnly": false}]
    }"#,
        "v231\n",
    );
    let pod = fx.pod();
    let args = stagehand_units::nspawn::pod_to_nspawn_args(&pod, "rkt-").unwrap();
    assert_eq!(args.len(), 5);
    assert_eq!(args[1], format!("--machine=rkt-{UUID}"));
    assert_eq!(args[3], "--bind=/srv/db:/opt/stage2/db/rootfs/var/lib/db");
    assert_eq!(args[4], "--capability=");
}
