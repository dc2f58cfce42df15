use redis_crate::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::{
    net::TcpListener,
    process::{Child, Command, Stdio},
    thread::sleep,
    time::Duration,
};

/// A `redis-server` on a free local port, killed when dropped.
pub struct TestContext {
    server: Child,
    port: u16,
}

impl TestContext {
    pub fn new() -> Self {
        let port = TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .expect("no free port");
        let server = Command::new("redis-server")
            .args(["--port", &port.to_string(), "--save", "", "--appendonly", "no"])
            .stdout(Stdio::null())
            .spawn()
            .expect("couldnt start redis-server");
        let context = TestContext { server, port };

        // wait for the server to accept connections
        let client = Client::open(context.get_client_connection_info()).unwrap();
        for _ in 0..100 {
            if client.get_connection().is_ok() {
                return context;
            }
            sleep(Duration::from_millis(20));
        }
        panic!("redis-server did not start on port {}", port);
    }

    pub fn get_client_connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp("127.0.0.1".to_string(), self.port),
            redis: RedisConnectionInfo::default(),
        }
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.server.kill();
        let _ = self.server.wait();
    }
}
