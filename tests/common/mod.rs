#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{Shutdown as SocketShutdown, SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use webserv::config::Config;
use webserv::server::{Runtime, Shutdown};

/// A runtime running on its own thread, stopped when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Shutdown,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(yaml: &str) -> Self {
        let config = Config::from_yaml(yaml).unwrap();
        let shutdown = Shutdown::new();
        let (tx, rx) = mpsc::channel();

        let flag = shutdown.clone();
        let thread = std::thread::spawn(move || {
            let mut runtime = Runtime::with_shutdown(config, flag).unwrap();
            tx.send(runtime.local_addrs()[0]).unwrap();
            runtime.run().unwrap();
        });
        let addr = rx.recv_timeout(Duration::from_secs(5)).unwrap();

        Self {
            addr,
            shutdown,
            thread: Some(thread),
        }
    }

    /// Sends `raw`, half-closes, and reads until the server closes.
    pub fn exchange(&self, raw: &[u8]) -> Reply {
        let mut stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        stream.write_all(raw).unwrap();
        stream.shutdown(SocketShutdown::Write).unwrap();

        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        Reply::parse(&data)
    }

    pub fn get(&self, path: &str) -> Reply {
        self.exchange(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn parse(data: &[u8]) -> Self {
        let split = data
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .unwrap_or_else(|| panic!("no header terminator in {:?}", String::from_utf8_lossy(data)));
        let head = std::str::from_utf8(&data[..split]).unwrap();
        let mut lines = head.split("\r\n");

        let status_line = lines.next().unwrap();
        let mut parts = status_line.splitn(3, ' ');
        assert_eq!(parts.next(), Some("HTTP/1.1"));
        let status = parts.next().unwrap().parse().unwrap();
        let reason = parts.next().unwrap_or_default().to_string();

        let headers = lines
            .map(|line| {
                let (name, value) = line.split_once(": ").unwrap();
                (name.to_string(), value.to_string())
            })
            .collect();

        Self {
            status,
            reason,
            headers,
            body: data[split + 4..].to_vec(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
