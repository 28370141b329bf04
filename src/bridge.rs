use crate::config::{AdbConfig, DEFAULT_DUMP_PATH};
use crate::coords::Point;
use crate::error::BridgeError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Device-control transport. Implementors only need `execute` and `pull`;
/// input injection and UI capture are expressed on top of them.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Runs a shell command on the device and returns its stdout.
    async fn execute(&self, args: &[&str]) -> Result<Vec<u8>, BridgeError>;

    /// Copies a device file to `local`.
    async fn pull(&self, remote: &str, local: &Path) -> Result<String, BridgeError>;

    async fn execute_text(&self, args: &[&str]) -> Result<String, BridgeError> {
        let out = self.execute(args).await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    async fn tap(&self, at: Point) -> Result<(), BridgeError> {
        let (x, y) = at.to_pixels();
        self.execute(&["input", "tap", &x.to_string(), &y.to_string()]).await?;
        Ok(())
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<(), BridgeError> {
        let (x1, y1) = from.to_pixels();
        let (x2, y2) = to.to_pixels();
        let ms = duration.as_millis().to_string();
        self.execute(&[
            "input",
            "swipe",
            &x1.to_string(),
            &y1.to_string(),
            &x2.to_string(),
            &y2.to_string(),
            &ms,
        ])
        .await?;
        Ok(())
    }

    /// Dumps the current UI hierarchy on the device and pulls it to `local`.
    async fn capture(&self, local: &Path) -> Result<(), BridgeError> {
        self.capture_via(DEFAULT_DUMP_PATH, local).await
    }

    async fn capture_via(&self, dump_path: &str, local: &Path) -> Result<(), BridgeError> {
        self.execute(&["uiautomator", "dump", dump_path]).await?;
        self.pull(dump_path, local).await?;
        Ok(())
    }

    /// Battery report from `dumpsys battery`, as printed by the device.
    async fn battery(&self) -> Result<String, BridgeError> {
        self.execute_text(&["dumpsys", "battery"]).await
    }

    /// Physical screen size as `(width, height)`, from `wm size`.
    async fn screen_size(&self) -> Result<(u32, u32), BridgeError> {
        let out = self.execute_text(&["wm", "size"]).await?;
        parse_wm_size(&out).ok_or_else(|| BridgeError::Io(format!("unexpected `wm size` output: {out:?}")))
    }
}

#[async_trait]
impl<T: Bridge + ?Sized> Bridge for Arc<T> {
    async fn execute(&self, args: &[&str]) -> Result<Vec<u8>, BridgeError> {
        (**self).execute(args).await
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<String, BridgeError> {
        (**self).pull(remote, local).await
    }

    async fn tap(&self, at: Point) -> Result<(), BridgeError> {
        (**self).tap(at).await
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<(), BridgeError> {
        (**self).swipe(from, to, duration).await
    }

    async fn capture(&self, local: &Path) -> Result<(), BridgeError> {
        (**self).capture(local).await
    }

    async fn battery(&self) -> Result<String, BridgeError> {
        (**self).battery().await
    }

    async fn screen_size(&self) -> Result<(u32, u32), BridgeError> {
        (**self).screen_size().await
    }
}

fn parse_wm_size(out: &str) -> Option<(u32, u32)> {
    // "Physical size: 1080x2400", possibly followed by "Override size: ..."
    let line = out.lines().find(|l| l.starts_with("Physical size:")).or_else(|| out.lines().next())?;
    let (_, dims) = line.rsplit_once(':')?;
    let (w, h) = dims.trim().split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// [`Bridge`] backed by the `adb` command line tool.
#[derive(Clone, Debug)]
pub struct AdbBridge {
    cfg: AdbConfig,
}

impl AdbBridge {
    pub fn new(cfg: AdbConfig) -> Self {
        Self { cfg }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.cfg.binary);
        if let Some(serial) = &self.cfg.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, BridgeError> {
        let cmdline = format!("{} {}", self.cfg.binary, args.join(" "));
        debug!(command = %cmdline, "adb");
        let output = tokio::time::timeout(self.cfg.command_timeout, self.command(args).output())
            .await
            .map_err(|_| BridgeError::Timeout { command: cmdline.clone(), timeout: self.cfg.command_timeout })?
            .map_err(|source| BridgeError::Spawn { command: cmdline.clone(), source })?;

        if !output.status.success() {
            return Err(BridgeError::Failed {
                command: cmdline,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Bridge for AdbBridge {
    async fn execute(&self, args: &[&str]) -> Result<Vec<u8>, BridgeError> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("shell");
        full.extend_from_slice(args);
        self.run(&full).await
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<String, BridgeError> {
        let local = local.to_string_lossy();
        let out = self.run(&["pull", remote, &local]).await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    async fn capture(&self, local: &Path) -> Result<(), BridgeError> {
        self.capture_via(&self.cfg.dump_path, local).await
    }
}
