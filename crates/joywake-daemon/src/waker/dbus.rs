//! Wake the screen with a session bus method call

use async_trait::async_trait;

use super::{ExecWaker, Waker, WakerError};

/// Build the `dbus-send` invocation for a dotted `interface.Method` name.
///
/// The service name equals the interface, and the object path is the
/// interface with dots turned into slashes, which is how every screensaver
/// implementation we call lays itself out.
pub fn method_call_args(method: &str) -> Result<Vec<String>, WakerError> {
    let (interface, _member) = method
        .rsplit_once('.')
        .filter(|(interface, member)| !interface.is_empty() && !member.is_empty())
        .ok_or_else(|| WakerError::MethodName {
            method: method.to_string(),
        })?;

    Ok(vec![
        "dbus-send".to_string(),
        "--session".to_string(),
        "--print-reply".to_string(),
        "--type=method_call".to_string(),
        format!("--dest={}", interface),
        format!("/{}", interface.replace('.', "/")),
        method.to_string(),
    ])
}

/// An [`ExecWaker`] running `dbus-send`, limited to one desktop environment
#[derive(Debug)]
pub struct DbusWaker {
    exec: ExecWaker,
    /// Desktop this waker needs but the session is not running
    missing_desktop: Option<String>,
}

impl DbusWaker {
    pub fn new(
        name: impl Into<String>,
        method: &str,
        desktop: Option<&str>,
        current_desktops: &[String],
    ) -> Result<Self, WakerError> {
        let exec = ExecWaker::new(name, Some(method_call_args(method)?), None)?;
        let missing_desktop = desktop
            .filter(|desktop| !current_desktops.iter().any(|current| current == desktop))
            .map(str::to_string);

        Ok(Self {
            exec,
            missing_desktop,
        })
    }

    /// Whether the session runs the desktop this waker is meant for
    pub fn available(&self) -> bool {
        self.missing_desktop.is_none()
    }

    pub fn exec(&self) -> &ExecWaker {
        &self.exec
    }
}

#[async_trait]
impl Waker for DbusWaker {
    fn name(&self) -> &str {
        self.exec.name()
    }

    fn failed(&self) -> bool {
        self.exec.failed()
    }

    async fn wake(&self) {
        if let Some(desktop) = &self.missing_desktop {
            self.exec
                .fail_permanently(format_args!("only works under {}", desktop));
            return;
        }
        self.exec.wake().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waker::ExecCommand;

    #[test]
    fn test_method_call_addressing() {
        let args = method_call_args("org.gnome.ScreenSaver.SimulateUserActivity").unwrap();
        assert_eq!(
            args,
            vec![
                "dbus-send",
                "--session",
                "--print-reply",
                "--type=method_call",
                "--dest=org.gnome.ScreenSaver",
                "/org/gnome/ScreenSaver",
                "org.gnome.ScreenSaver.SimulateUserActivity",
            ]
        );
    }

    #[test]
    fn test_rejects_undotted_method() {
        for method in ["SimulateUserActivity", "org.gnome.", ".Method", ""] {
            assert!(
                matches!(method_call_args(method), Err(WakerError::MethodName { .. })),
                "{:?}",
                method
            );
        }
    }

    #[test]
    fn test_desktop_availability() {
        let desktops = vec!["ubuntu".to_string(), "GNOME".to_string()];

        let gnome = DbusWaker::new(
            "gnome",
            "org.gnome.ScreenSaver.SimulateUserActivity",
            Some("GNOME"),
            &desktops,
        )
        .unwrap();
        assert!(gnome.available());

        let mate = DbusWaker::new(
            "mate",
            "org.mate.ScreenSaver.SimulateUserActivity",
            Some("MATE"),
            &desktops,
        )
        .unwrap();
        assert!(!mate.available());

        let any = DbusWaker::new(
            "freedesktop",
            "org.freedesktop.ScreenSaver.SimulateUserActivity",
            None,
            &[],
        )
        .unwrap();
        assert!(any.available());
        assert!(matches!(
            any.exec().command(),
            ExecCommand::Args(args) if args[0] == "dbus-send"
        ));
    }

    #[tokio::test]
    async fn test_unavailable_waker_fails_without_running() {
        let waker = DbusWaker::new(
            "mate",
            "org.mate.ScreenSaver.SimulateUserActivity",
            Some("MATE"),
            &["KDE".to_string()],
        )
        .unwrap();
        assert!(!waker.failed());

        waker.wake().await;

        assert!(waker.failed());
        assert_eq!(waker.exec().soft_failures(), 0);
        assert_eq!(waker.name(), "mate");
    }
}
