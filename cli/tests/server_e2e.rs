//! Smoke test: spawns the `echogarden` binary's default `serve` command
//! against a loopback port and checks `/healthz` comes back healthy. Full
//! route coverage lives in the server crate (`cargo test -p echogarden-server`).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn get(addr: &str, path: &str) -> Option<String> {
    let mut stream = TcpStream::connect(addr).ok()?;
    stream.set_read_timeout(Some(Duration::from_millis(500))).ok()?;
    write!(stream, "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").ok()?;
    let mut buf = String::new();
    stream.read_to_string(&mut buf).ok();
    if buf.is_empty() {
        None
    } else {
        Some(buf)
    }
}

#[test]
fn server_e2e_smoke_healthz() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("eg.db");
    let addr = "127.0.0.1:18181";

    let child = Command::new(env!("CARGO_BIN_EXE_echogarden"))
        .arg("--db-path")
        .arg(&db_path)
        .arg("--bind-addr")
        .arg(addr)
        .env_remove("EG_LLM_URL")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn echogarden binary");
    let _guard = ChildGuard(child);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut response = None;
    while Instant::now() < deadline {
        if let Some(resp) = get(addr, "/healthz") {
            response = Some(resp);
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let response = response.expect("server never became reachable");
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
    assert!(response.contains("\"db\":true"));
}
