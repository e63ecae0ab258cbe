//! Unit option builders.
//!
//! Everything here is pure: the values an app needs are resolved by
//! [`crate::emitter`] and handed in, and the option lists come back in the
//! exact order the supervisor files are written.

use stagehand_common::error::{Result, StagehandError};
use stagehand_common::manifest::{EventHandler, Pod, Port};
use stagehand_core::capability::CapabilitySet;
use stagehand_core::cgroup::Tunable;

use crate::escape::quote_exec;
use crate::paths;
use crate::unit::UnitOption;

/// Everything needed to render one app's service unit.
#[derive(Debug, Clone)]
pub struct ServiceSpec<'a> {
    /// App name.
    pub app_name: &'a str,
    /// Image the app comes from, for the description.
    pub image_name: &'a str,
    /// Command line with the executable already resolved.
    pub exec: Vec<String>,
    /// Executable as declared, used for the syslog identifier.
    pub declared_exec: &'a str,
    /// Working directory inside the app.
    pub working_directory: &'a str,
    /// Resolved user id.
    pub uid: u32,
    /// Resolved group id.
    pub gid: u32,
    /// Supplementary group ids.
    pub supplementary_gids: &'a [u32],
    /// Bounding set.
    pub capabilities: &'a CapabilitySet,
    /// Hooks run around the app.
    pub event_handlers: &'a [EventHandler],
    /// Resource directives.
    pub tunables: &'a [Tunable],
    /// Whether a socket unit activates this service.
    pub socket_activated: bool,
    /// Attach the app to the console's tty.
    pub interactive: bool,
}

/// Builds the app's service unit.
///
/// # Errors
///
/// Returns a configuration error for an empty command line or an unknown
/// event handler.
pub fn service_options(spec: &ServiceSpec<'_>) -> Result<Vec<UnitOption>> {
    let app = spec.app_name;
    let supplementary = spec
        .supplementary_gids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ");

    let mut opts = vec![
        UnitOption::unit(
            "Description",
            format!("Application={app} Image={}", spec.image_name),
        ),
        UnitOption::unit("DefaultDependencies", "false"),
        UnitOption::unit("Wants", paths::reaper_unit_name(app)),
        UnitOption::service("Restart", "no"),
        UnitOption::service("ExecStart", quote_exec(&spec.exec)?),
        UnitOption::service("RootDirectory", paths::rel_app_rootfs(app)),
        UnitOption::service("WorkingDirectory", spec.working_directory),
        UnitOption::service("EnvironmentFile", paths::rel_env_file_systemd(app)),
        UnitOption::service("User", spec.uid.to_string()),
        UnitOption::service("Group", spec.gid.to_string()),
        UnitOption::service("SupplementaryGroups", supplementary),
        UnitOption::service("CapabilityBoundingSet", spec.capabilities.to_unit_value()),
    ];

    if spec.interactive {
        opts.extend([
            UnitOption::service("StandardInput", "tty"),
            UnitOption::service("StandardOutput", "tty"),
            UnitOption::service("StandardError", "tty"),
        ]);
    } else {
        opts.extend([
            UnitOption::service("StandardOutput", "journal+console"),
            UnitOption::service("StandardError", "journal+console"),
            UnitOption::service("SyslogIdentifier", base_name(spec.declared_exec)),
        ]);
    }

    // a failing app takes the whole pod down
    opts.push(UnitOption::unit("OnFailure", "halt.target"));

    for handler in spec.event_handlers {
        let directive = match handler.name.as_str() {
            "pre-start" => "ExecStartPre",
            "post-stop" => "ExecStopPost",
            other => {
                return Err(StagehandError::config(format!(
                    "unrecognized eventHandler: {other}"
                )));
            }
        };
        opts.push(UnitOption::service(directive, quote_exec(&handler.exec)?));
    }

    // pre-start hooks may take arbitrarily long
    opts.push(UnitOption::service("TimeoutStartSec", "0"));

    opts.extend(
        spec.tunables
            .iter()
            .map(|t| UnitOption::service(t.key, t.value.clone())),
    );

    if spec.socket_activated {
        opts.push(UnitOption::unit("Requires", paths::socket_unit_name(app)));
    }

    let prepare = paths::instantiated_prepare_app_unit_name(app);
    opts.extend([
        UnitOption::unit("Requires", prepare.clone()),
        UnitOption::unit("After", prepare),
        UnitOption::unit("Requires", "sysusers.service"),
        UnitOption::unit("After", "sysusers.service"),
    ]);
    Ok(opts)
}

/// Builds the socket unit for the app's socket-activated ports.
///
/// Each port listens on the host port forwarded to it, since the socket is
/// created on the host side. Without a forward, the in-image port is used
/// and a warning logged.
///
/// # Errors
///
/// Returns a configuration error for a protocol other than `tcp` or `udp`.
pub fn socket_options(
    pod: &Pod,
    app_name: &str,
    image_name: &str,
    ports: &[&Port],
) -> Result<Vec<UnitOption>> {
    let mut opts = vec![
        UnitOption::unit(
            "Description",
            format!("Application={app_name} Image={image_name} socket-activated ports"),
        ),
        UnitOption::unit("DefaultDependencies", "false"),
        UnitOption::socket("BindIPv6Only", "both"),
        UnitOption::socket("Service", paths::service_unit_name(app_name)),
    ];

    for port in ports {
        let directive = match port.protocol.as_str() {
            "tcp" => "ListenStream",
            "udp" => "ListenDatagram",
            other => {
                return Err(StagehandError::config(format!(
                    "unrecognized protocol: {other}"
                )));
            }
        };
        let mut number = pod.host_port(&port.name);
        if number == 0 {
            tracing::warn!(
                port = %port.name,
                fallback = port.port,
                "no host port forwarded for socket-activated port, using the port declared by the image"
            );
            number = port.port;
        }
        opts.push(UnitOption::socket(directive, number.to_string()));
    }
    Ok(opts)
}

/// Builds the reaper unit, whose stop job collects the app's exit status.
#[must_use]
pub fn reaper_options(app_name: &str) -> Vec<UnitOption> {
    vec![
        UnitOption::unit("Description", format!("{app_name} Reaper")),
        UnitOption::unit("DefaultDependencies", "false"),
        UnitOption::unit("StopWhenUnneeded", "yes"),
        UnitOption::unit("Wants", "shutdown.service"),
        UnitOption::unit("After", "shutdown.service"),
        UnitOption::unit("Conflicts", "exit.target"),
        UnitOption::unit("Conflicts", "halt.target"),
        UnitOption::unit("Conflicts", "poweroff.target"),
        UnitOption::service("RemainAfterExit", "yes"),
        UnitOption::service("ExecStop", format!("/reaper.sh {app_name}")),
    ]
}

/// Builds the pod-wide shutdown unit.
#[must_use]
pub fn shutdown_options(verb: &str) -> Vec<UnitOption> {
    vec![
        UnitOption::unit("Description", "Pod shutdown"),
        UnitOption::unit("AllowIsolate", "true"),
        UnitOption::unit("StopWhenUnneeded", "yes"),
        UnitOption::unit("DefaultDependencies", "false"),
        UnitOption::service("RemainAfterExit", "yes"),
        UnitOption::service("ExecStop", format!("/usr/bin/systemctl --force {verb}")),
    ]
}

/// Builds the default target that wants every app's service.
#[must_use]
pub fn default_target_options<'a>(app_names: impl IntoIterator<Item = &'a str>) -> Vec<UnitOption> {
    let mut opts = vec![
        UnitOption::unit("Description", "rkt apps target"),
        UnitOption::unit("DefaultDependencies", "false"),
    ];
    for app in app_names {
        let service = paths::service_unit_name(app);
        opts.push(UnitOption::unit("After", service.clone()));
        opts.push(UnitOption::unit("Wants", service));
    }
    opts
}

/// Builds the template instantiated once per app to prepare its root.
#[must_use]
pub fn prepare_app_template_options() -> Vec<UnitOption> {
    vec![
        UnitOption::unit(
            "Description",
            "Prepare minimum environment for chrooted applications",
        ),
        UnitOption::unit("DefaultDependencies", "false"),
        UnitOption::unit("OnFailureJobMode", "fail"),
        UnitOption::unit("Requires", "systemd-journald.service"),
        UnitOption::unit("After", "systemd-journald.service"),
        UnitOption::service("Type", "oneshot"),
        UnitOption::service("Restart", "no"),
        UnitOption::service("ExecStart", "/prepare-app %I"),
        UnitOption::service("User", "0"),
        UnitOption::service("Group", "0"),
        UnitOption::service("CapabilityBoundingSet", "CAP_SYS_ADMIN CAP_DAC_OVERRIDE"),
    ]
}

fn base_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use stagehand_common::manifest::{ExposedPort, PodManifest};
    use stagehand_common::types::PodId;

    use super::*;
    use crate::unit::{Section, find, serialize};

    fn spec<'a>(caps: &'a CapabilitySet, handlers: &'a [EventHandler]) -> ServiceSpec<'a> {
        ServiceSpec {
            app_name: "web",
            image_name: "example.com/web",
            exec: vec!["/usr/bin/web".into(), "--price=$5".into()],
            declared_exec: "web",
            working_directory: "/",
            uid: 1000,
            gid: 1000,
            supplementary_gids: &[],
            capabilities: caps,
            event_handlers: handlers,
            tunables: &[],
            socket_activated: false,
            interactive: false,
        }
    }

    fn pod_with_ports(ports: Vec<ExposedPort>) -> Pod {
        let manifest = PodManifest {
            ports,
            ..PodManifest::default()
        };
        Pod::new("/pod", PodId::generate(), manifest)
    }

    fn port(name: &str, protocol: &str, number: u16) -> Port {
        Port {
            name: name.into(),
            protocol: protocol.into(),
            port: number,
            socket_activated: true,
        }
    }

    #[test]
    fn service_unit_text() {
        let caps = CapabilitySet::bounding_set(&[], &["CAP_KILL", "CAP_CHOWN"]);
        let opts = service_options(&spec(&caps, &[])).unwrap();
        let expected = "\
[Unit]
Description=Application=web Image=example.com/web
DefaultDependencies=false
Wants=reaper-web.service
OnFailure=halt.target
Requires=prepare-app@opt-stage2-web-rootfs.service
After=prepare-app@opt-stage2-web-rootfs.service
Requires=sysusers.service
After=sysusers.service

[Service]
Restart=no
ExecStart=\"/usr/bin/web\" \"--price=$$5\"
RootDirectory=/opt/stage2/web/rootfs
WorkingDirectory=/
EnvironmentFile=/rkt/env/web
User=1000
Group=1000
SupplementaryGroups=
CapabilityBoundingSet=CAP_KILL CAP_CHOWN
StandardOutput=journal+console
StandardError=journal+console
SyslogIdentifier=web
TimeoutStartSec=0
";
        assert_eq!(serialize(&opts), expected);
    }

    #[test]
    fn interactive_uses_tty() {
        let caps = CapabilitySet::default();
        let mut s = spec(&caps, &[]);
        s.interactive = true;
        let opts = service_options(&s).unwrap();
        assert_eq!(find(&opts, Section::Service, "StandardInput"), Some("tty"));
        assert_eq!(find(&opts, Section::Service, "SyslogIdentifier"), None);
    }

    #[test]
    fn event_handlers_map_to_exec_hooks() {
        let caps = CapabilitySet::default();
        let handlers = vec![
            EventHandler {
                name: "pre-start".into(),
                exec: vec!["/bin/prep".into()],
            },
            EventHandler {
                name: "post-stop".into(),
                exec: vec!["/bin/clean".into(), "$x".into()],
            },
        ];
        let opts = service_options(&spec(&caps, &handlers)).unwrap();
        assert_eq!(
            find(&opts, Section::Service, "ExecStartPre"),
            Some("\"/bin/prep\"")
        );
        assert_eq!(
            find(&opts, Section::Service, "ExecStopPost"),
            Some("\"/bin/clean\" \"$$x\"")
        );
    }

    #[test]
    fn unknown_event_handler_is_fatal() {
        let caps = CapabilitySet::default();
        let handlers = vec![EventHandler {
            name: "post-start".into(),
            exec: vec!["/bin/x".into()],
        }];
        let err = service_options(&spec(&caps, &handlers)).unwrap_err();
        assert!(err.to_string().contains("unrecognized eventHandler: post-start"));
    }

    #[test]
    fn socket_requires_and_tunables_order() {
        let caps = CapabilitySet::default();
        let tunables = vec![Tunable {
            key: "MemoryLimit",
            value: "1024".into(),
        }];
        let mut s = spec(&caps, &[]);
        s.tunables = &tunables;
        s.socket_activated = true;
        let opts = service_options(&s).unwrap();
        let keys: Vec<_> = opts.iter().map(|o| o.name.as_str()).collect();
        let timeout = keys.iter().position(|k| *k == "TimeoutStartSec").unwrap();
        assert_eq!(keys[timeout + 1], "MemoryLimit");
        assert_eq!(opts[timeout + 2].value, "web.socket");
    }

    #[test]
    fn tcp_and_udp_listeners() {
        let pod = pod_with_ports(vec![ExposedPort {
            name: "http".into(),
            host_port: 8080,
        }]);
        let http = port("http", "tcp", 80);
        let dns = port("dns", "udp", 53);
        let opts = socket_options(&pod, "web", "img", &[&http, &dns]).unwrap();
        assert_eq!(find(&opts, Section::Socket, "ListenStream"), Some("8080"));
        assert_eq!(find(&opts, Section::Socket, "ListenDatagram"), Some("53"));
        assert_eq!(find(&opts, Section::Socket, "Service"), Some("web.service"));
    }

    #[test]
    fn unknown_protocol_is_fatal() {
        let pod = pod_with_ports(Vec::new());
        let sctp = port("x", "sctp", 1);
        assert!(socket_options(&pod, "web", "img", &[&sctp]).is_err());
    }

    #[test]
    fn reaper_conflicts_with_every_stop_target() {
        let text = serialize(&reaper_options("web"));
        assert!(text.contains("Conflicts=exit.target\nConflicts=halt.target\nConflicts=poweroff.target\n"));
        assert!(text.ends_with("ExecStop=/reaper.sh web\n"));
    }

    #[test]
    fn default_target_wants_every_app() {
        let text = serialize(&default_target_options(["a", "b"]));
        assert_eq!(
            text,
            "[Unit]\nDescription=rkt apps target\nDefaultDependencies=false\n\
             After=a.service\nWants=a.service\nAfter=b.service\nWants=b.service\n"
        );
    }

    #[test]
    fn shutdown_uses_verb() {
        let opts = shutdown_options("halt");
        assert_eq!(
            find(&opts, Section::Service, "ExecStop"),
            Some("/usr/bin/systemctl --force halt")
        );
    }
}
