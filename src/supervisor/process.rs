//! OS process discovery, termination and launch for workers
//!
//! Discovery maps a port to the processes serving it. On Linux the kernel
//! socket tables are consulted directly; on every platform the process table
//! is additionally scanned for worker command lines carrying the port flag,
//! which also finds a hung worker that has stopped listening.

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::registry::WorkerConfig;
use crate::clienv;

pub const PORT_FLAG: &str = "--http-port";
pub const PROFILE_FLAG: &str = "--profile";
pub const DATA_FLAG: &str = "--naps2-data";

/// Everything needed to start one worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// File receiving the worker's stdout and stderr
    pub log_path: PathBuf,
}

impl LaunchSpec {
    pub fn for_worker(binary: &str, worker: &WorkerConfig) -> Self {
        let data_dir = worker.resolved_data_dir();
        Self {
            name: worker.name.clone(),
            program: binary.to_string(),
            args: vec![
                PORT_FLAG.to_string(),
                worker.port.to_string(),
                PROFILE_FLAG.to_string(),
                worker.name.clone(),
                DATA_FLAG.to_string(),
                data_dir.to_string_lossy().into_owned(),
            ],
            log_path: clienv::worker_log_path(&worker.name),
        }
    }
}

/// OS operations the restart workflow needs.
///
/// `find_pids` and `kill_tree` may block and are called from the blocking pool.
/// `launch` is called from within the async runtime.
pub trait ProcessControl: Send + Sync + 'static {
    /// PIDs of processes serving `port`.
    fn find_pids(&self, port: u16) -> Vec<u32>;

    /// Forcefully kill `pid` and all of its descendants; returns the PIDs signalled.
    fn kill_tree(&self, pid: u32) -> io::Result<Vec<u32>>;

    /// Start a worker process; returns its PID when the OS reports one.
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Option<u32>>;
}

/// [`ProcessControl`] backed by the real process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

impl SystemProcesses {
    pub fn new() -> Self {
        Self
    }

    fn cmdline_pids(&self, port: u16) -> Vec<u32> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );

        sys.processes()
            .iter()
            .filter(|(_, p)| p.thread_kind().is_none())
            .filter(|(_, p)| cmd_matches_port(p.cmd(), port))
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }
}

impl ProcessControl for SystemProcesses {
    fn find_pids(&self, port: u16) -> Vec<u32> {
        let mut pids = BTreeSet::new();

        #[cfg(target_os = "linux")]
        pids.extend(proc_sockets::listening_pids(port));

        pids.extend(self.cmdline_pids(port));
        pids.remove(&std::process::id());

        debug!(port, pids = ?pids, "Discovered worker processes");
        pids.into_iter().collect()
    }

    fn kill_tree(&self, pid: u32) -> io::Result<Vec<u32>> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );

        if sys.process(Pid::from_u32(pid)).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("process {} not found", pid),
            ));
        }

        let parents: Vec<(u32, Option<u32>)> = sys
            .processes()
            .iter()
            .filter(|(_, p)| p.thread_kind().is_none())
            .map(|(pid, p)| (pid.as_u32(), p.parent().map(|pp| pp.as_u32())))
            .collect();

        let mut killed = Vec::new();
        for target in kill_order(&parents, pid) {
            let Some(process) = sys.process(Pid::from_u32(target)) else {
                continue;
            };
            if process.kill() {
                killed.push(target);
            } else if target == pid {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("failed to signal process {}", pid),
                ));
            } else {
                warn!("Failed to kill child process {} of {}", target, pid);
            }
        }

        Ok(killed)
    }

    fn launch(&self, spec: &LaunchSpec) -> io::Result<Option<u32>> {
        let stdout = open_log(spec)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        // Keep workers out of the supervisor's process group so a terminal
        // Ctrl+C does not take the fleet down with it.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        info!("Started worker '{}' with PID {:?}", spec.name, pid);

        let name = spec.name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!("Worker '{}' exited: {}", name, status),
                Err(e) => warn!("Failed to wait on worker '{}': {}", name, e),
            }
        });

        Ok(pid)
    }
}

fn open_log(spec: &LaunchSpec) -> io::Result<File> {
    if let Some(parent) = spec.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&spec.log_path)
}

/// Whether a command line carries `--http-port <port>` or `--http-port=<port>`.
pub fn cmd_matches_port<S: AsRef<OsStr>>(cmd: &[S], port: u16) -> bool {
    let port = port.to_string();
    let inline = format!("{}={}", PORT_FLAG, port);

    cmd.windows(2)
        .any(|pair| arg(&pair[0]) == Some(PORT_FLAG) && arg(&pair[1]) == Some(port.as_str()))
        || cmd.iter().any(|s| arg(s) == Some(inline.as_str()))
}

fn arg<S: AsRef<OsStr>>(s: &S) -> Option<&str> {
    s.as_ref().to_str()
}

/// Descendants of `root` deepest first, `root` last.
fn kill_order(parents: &[(u32, Option<u32>)], root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(pid, parent) in parents {
        if let Some(parent) = parent {
            if pid != parent {
                children.entry(parent).or_default().push(pid);
            }
        }
    }

    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    let mut stack = vec![(root, false)];
    while let Some((pid, expanded)) = stack.pop() {
        if expanded {
            order.push(pid);
            continue;
        }
        if !seen.insert(pid) {
            continue;
        }
        stack.push((pid, true));
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids.iter().map(|&k| (k, false)));
        }
    }
    order
}

#[cfg(target_os = "linux")]
mod proc_sockets {
    use std::collections::HashSet;
    use std::fs;

    const TCP_LISTEN: &str = "0A";
    const SOCKET_TABLES: [&str; 2] = ["/proc/net/tcp", "/proc/net/tcp6"];

    /// PIDs holding a listening socket bound to `port`.
    pub fn listening_pids(port: u16) -> Vec<u32> {
        let inodes: HashSet<u64> = SOCKET_TABLES
            .iter()
            .filter_map(|path| fs::read_to_string(path).ok())
            .flat_map(|table| parse_listening_inodes(&table, port))
            .collect();

        if inodes.is_empty() {
            return Vec::new();
        }

        let Ok(entries) = fs::read_dir("/proc") else {
            return Vec::new();
        };

        entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| owns_any_socket(*pid, &inodes))
            .collect()
    }

    fn owns_any_socket(pid: u32, inodes: &HashSet<u64>) -> bool {
        // Unreadable fd directories belong to other users; skip them.
        let Ok(fds) = fs::read_dir(format!("/proc/{}/fd", pid)) else {
            return false;
        };
        fds.flatten().any(|fd| {
            fs::read_link(fd.path())
                .ok()
                .and_then(|target| socket_inode(&target.to_string_lossy()))
                .is_some_and(|inode| inodes.contains(&inode))
        })
    }

    fn socket_inode(link: &str) -> Option<u64> {
        link.strip_prefix("socket:[")?
            .strip_suffix(']')?
            .parse()
            .ok()
    }

    /// Inodes of LISTEN sockets on `port` from a /proc/net/tcp{,6} table.
    pub(super) fn parse_listening_inodes(table: &str, port: u16) -> Vec<u64> {
        table
            .lines()
            .skip(1)
            .filter_map(|line| {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < 10 || fields[3] != TCP_LISTEN {
                    return None;
                }
                let (_, port_hex) = fields[1].rsplit_once(':')?;
                if u16::from_str_radix(port_hex, 16).ok()? != port {
                    return None;
                }
                fields[9].parse::<u64>().ok().filter(|inode| *inode != 0)
            })
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:2365 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 41234 1 0000000000000000 100 0 0 10 0
   1: 00000000:2366 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 41235 1 0000000000000000 100 0 0 10 0
   2: 0100007F:2365 0100007F:D431 01 00000000:00000000 00:00000000 00000000  1000        0 41300 1 0000000000000000 20 4 30 10 -1
";

        #[test]
        fn test_parse_listening_inodes() {
            // 0x2365 = 9061, 0x2366 = 9062
            assert_eq!(parse_listening_inodes(TABLE, 9061), vec![41234]);
            assert_eq!(parse_listening_inodes(TABLE, 9062), vec![41235]);
            assert!(parse_listening_inodes(TABLE, 9063).is_empty());
        }

        #[test]
        fn test_socket_inode() {
            assert_eq!(socket_inode("socket:[41234]"), Some(41234));
            assert_eq!(socket_inode("pipe:[41234]"), None);
            assert_eq!(socket_inode("/dev/null"), None);
        }

        #[test]
        fn test_finds_own_listener() {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            assert!(listening_pids(port).contains(&std::process::id()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_spec_args() {
        let worker = WorkerConfig::new("client01", 9061, "/srv/naps2-client01");
        let spec = LaunchSpec::for_worker("/opt/naps2/NAPS2", &worker);

        assert_eq!(spec.program, "/opt/naps2/NAPS2");
        assert_eq!(
            spec.args,
            vec![
                "--http-port",
                "9061",
                "--profile",
                "client01",
                "--naps2-data",
                "/srv/naps2-client01"
            ]
        );
        assert!(spec.log_path.ends_with("logs/client01.log"));
    }

    #[test]
    fn test_launch_spec_expands_home() {
        let worker = WorkerConfig::new("client02", 9062, "~/naps2-client02");
        let spec = LaunchSpec::for_worker("naps2", &worker);
        assert!(!spec.args[5].starts_with('~'));
        assert!(spec.args[5].ends_with("naps2-client02"));
    }

    #[test]
    fn test_cmd_matches_port() {
        assert!(cmd_matches_port(
            &["NAPS2", "--http-port", "9061", "--profile", "client01"],
            9061
        ));
        assert!(cmd_matches_port(&["NAPS2", "--http-port=9061"], 9061));
        assert!(!cmd_matches_port(&["NAPS2", "--http-port", "9062"], 9061));
        assert!(!cmd_matches_port(&["NAPS2", "--profile", "9061"], 9061));
        assert!(!cmd_matches_port(&["NAPS2", "--http-port", "90611"], 9061));
        assert!(!cmd_matches_port::<&str>(&[], 9061));
    }

    #[test]
    fn test_kill_order_children_first() {
        // 10 -> 11 -> 13, 10 -> 12; 20 unrelated
        let parents = vec![
            (10, Some(1)),
            (11, Some(10)),
            (12, Some(10)),
            (13, Some(11)),
            (20, Some(1)),
        ];
        let order = kill_order(&parents, 10);

        assert_eq!(order.len(), 4);
        assert_eq!(*order.last().unwrap(), 10);
        let pos = |pid| order.iter().position(|&p| p == pid).unwrap();
        assert!(pos(13) < pos(11));
        assert!(pos(11) < pos(10));
        assert!(pos(12) < pos(10));
        assert!(!order.contains(&20));
    }

    #[test]
    fn test_kill_order_lone_process() {
        assert_eq!(kill_order(&[(42, Some(1))], 42), vec![42]);
        assert_eq!(kill_order(&[], 42), vec![42]);
    }

    #[test]
    fn test_kill_tree_missing_process() {
        // PIDs are bounded well below u32::MAX on every supported platform
        let err = SystemProcesses::new().kill_tree(u32::MAX - 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_find_pids_excludes_self() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!SystemProcesses::new()
            .find_pids(port)
            .contains(&std::process::id()));
    }

    #[tokio::test]
    async fn test_launch_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec {
            name: "client01".to_string(),
            program: dir
                .path()
                .join("no-such-worker")
                .to_string_lossy()
                .into_owned(),
            args: vec![],
            log_path: dir.path().join("logs").join("client01.log"),
        };
        assert!(SystemProcesses::new().launch(&spec).is_err());
    }
}
