//! Bubblewrap (`bwrap`) command builder for toolchain isolation.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::process::Command;

/// Builder for a `bwrap` invocation.
///
/// Network, pid, ipc and uts namespaces are unshared unless turned off.
#[derive(Debug, Clone)]
pub struct BubblewrapBuilder {
    binary: PathBuf,
    binds_ro: Vec<(PathBuf, PathBuf)>,
    binds_rw: Vec<(PathBuf, PathBuf)>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    unshare_net: bool,
    unshare_pid: bool,
    unshare_ipc: bool,
    unshare_uts: bool,
    die_with_parent: bool,
    hostname: Option<String>,
}

impl Default for BubblewrapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BubblewrapBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("bwrap"),
            binds_ro: Vec::new(),
            binds_rw: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            unshare_net: true,
            unshare_pid: true,
            unshare_ipc: true,
            unshare_uts: true,
            die_with_parent: true,
            hostname: Some("sol-build".to_owned()),
        }
    }

    /// `bwrap` executable, looked up on `PATH` unless absolute.
    #[must_use]
    pub fn binary(mut self, path: impl AsRef<Path>) -> Self {
        self.binary = path.as_ref().to_owned();
        self
    }

    #[must_use]
    pub fn bind_ro(mut self, src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Self {
        self.binds_ro
            .push((src.as_ref().to_owned(), dest.as_ref().to_owned()));
        self
    }

    #[must_use]
    pub fn bind_rw(mut self, src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Self {
        self.binds_rw
            .push((src.as_ref().to_owned(), dest.as_ref().to_owned()));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn cwd(mut self, path: impl AsRef<Path>) -> Self {
        self.cwd = Some(path.as_ref().to_owned());
        self
    }

    /// Dependency fetches need the network; everything else runs offline.
    #[must_use]
    pub const fn unshare_net(mut self, unshare: bool) -> Self {
        self.unshare_net = unshare;
        self
    }

    /// Arguments passed to `bwrap`, ending with `-- program args...`.
    pub fn args<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> Vec<std::ffi::OsString> {
        let mut out: Vec<std::ffi::OsString> = Vec::new();
        let mut push = |s: &dyn AsRef<OsStr>| out.push(s.as_ref().to_owned());

        if self.unshare_net {
            push(&"--unshare-net");
        }
        if self.unshare_pid {
            push(&"--unshare-pid");
        }
        if self.unshare_ipc {
            push(&"--unshare-ipc");
        }
        if self.unshare_uts {
            push(&"--unshare-uts");
        }
        push(&"--new-session");
        if self.die_with_parent {
            push(&"--die-with-parent");
        }
        if let Some(hostname) = &self.hostname {
            push(&"--hostname");
            push(hostname);
        }

        push(&"--dev");
        push(&"/dev");
        push(&"--proc");
        push(&"/proc");
        push(&"--tmpfs");
        push(&"/tmp");

        for (src, dest) in &self.binds_ro {
            push(&"--ro-bind");
            push(src);
            push(dest);
        }
        for (src, dest) in &self.binds_rw {
            push(&"--bind");
            push(src);
            push(dest);
        }
        for (key, value) in &self.env {
            push(&"--setenv");
            push(key);
            push(value);
        }
        if let Some(cwd) = &self.cwd {
            push(&"--chdir");
            push(cwd);
        }

        push(&"--");
        push(&program);
        for arg in args {
            push(arg);
        }
        out
    }

    pub fn build<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args(program, args));
        cmd
    }
}
