use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::{Error, Result},
    protocol::{Request, Response},
};

/// Generous enough for a scan of a large folder.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Blocking client for a running daemon. Each call opens its own
/// connection.
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Client {
    pub fn new(socket_path: &Path) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn send(&self, request: &Request) -> Result<Response> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            Error::Config(format!(
                "cannot reach daemon at {}: {e}",
                self.socket_path.display()
            ))
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        stream.write_all(&line)?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        if reader.read_line(&mut reply)? == 0 {
            return Err(Error::Config(
                "daemon closed the connection without replying".to_string(),
            ));
        }
        Ok(serde_json::from_str(&reply)?)
    }

    /// True when the daemon answers a ping.
    pub fn is_running(&self) -> bool {
        self.socket_path.exists()
            && self
                .send(&Request::new("ping", serde_json::Value::Null))
                .is_ok_and(|r| r.is_success())
    }
}
